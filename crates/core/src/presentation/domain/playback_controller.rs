use crate::presentation::domain::media_clip::MediaClip;
use crate::presentation::domain::media_surface::MediaSurface;

/// What the controller last acted on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttentionState {
    /// The viewer is looking; media is hidden.
    Engaged,
    /// The viewer looked away; media is showing and playing.
    Diverted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackAction {
    ShowAndPlay,
    HideAndPause,
}

/// Turns attention signals into show/play and hide/pause on a surface.
///
/// Starts `Engaged`. Only a change of signal does anything; repeats are
/// no-ops.
pub struct PlaybackController<S: MediaSurface> {
    surface: S,
    state: AttentionState,
    clip: Option<MediaClip>,
}

impl<S: MediaSurface> PlaybackController<S> {
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            state: AttentionState::Engaged,
            clip: None,
        }
    }

    pub fn state(&self) -> AttentionState {
        self.state
    }

    pub fn current_clip(&self) -> Option<&MediaClip> {
        self.clip.as_ref()
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Applies one attention signal. Returns the action taken, if any.
    pub fn apply(&mut self, attentive: bool) -> Option<PlaybackAction> {
        match (self.state, attentive) {
            (AttentionState::Diverted, true) => {
                self.surface.hide();
                self.surface.pause();
                self.state = AttentionState::Engaged;
                log::info!("Viewer is back; hiding media");
                Some(PlaybackAction::HideAndPause)
            }
            (AttentionState::Engaged, false) => {
                self.surface.show();
                self.surface.play();
                self.state = AttentionState::Diverted;
                log::info!("Viewer looked away; showing media");
                Some(PlaybackAction::ShowAndPlay)
            }
            _ => None,
        }
    }

    /// Swaps in `clip`, stopping whatever was loaded. If the viewer is
    /// currently diverted the new clip is shown and played straight away.
    pub fn select(&mut self, clip: MediaClip) -> Result<(), Box<dyn std::error::Error>> {
        self.surface.stop();
        self.clip = None;
        self.surface.load(&clip)?;
        log::info!("Selected media {:?} ({})", clip.name(), clip.path().display());
        self.clip = Some(clip);
        if self.state == AttentionState::Diverted {
            self.surface.show();
            self.surface.play();
        }
        Ok(())
    }

    pub fn shutdown(&mut self) {
        self.surface.stop();
        self.clip = None;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub(crate) enum Call {
        Load(String),
        Show,
        Hide,
        Play,
        Pause,
        Stop,
    }

    #[derive(Default)]
    pub(crate) struct RecordingSurface {
        pub(crate) calls: Vec<Call>,
        pub(crate) fail_load: bool,
    }

    impl MediaSurface for RecordingSurface {
        fn load(&mut self, clip: &MediaClip) -> Result<(), Box<dyn std::error::Error>> {
            if self.fail_load {
                return Err(format!("cannot open {}", clip.path().display()).into());
            }
            self.calls.push(Call::Load(clip.name().to_string()));
            Ok(())
        }
        fn show(&mut self) {
            self.calls.push(Call::Show);
        }
        fn hide(&mut self) {
            self.calls.push(Call::Hide);
        }
        fn play(&mut self) {
            self.calls.push(Call::Play);
        }
        fn pause(&mut self) {
            self.calls.push(Call::Pause);
        }
        fn stop(&mut self) {
            self.calls.push(Call::Stop);
        }
    }

    fn controller() -> PlaybackController<RecordingSurface> {
        PlaybackController::new(RecordingSurface::default())
    }

    fn apply_all(
        c: &mut PlaybackController<RecordingSurface>,
        signals: &[bool],
    ) -> Vec<PlaybackAction> {
        signals.iter().filter_map(|&s| c.apply(s)).collect()
    }

    #[test]
    fn test_starts_engaged_and_silent() {
        let c = controller();
        assert_eq!(c.state(), AttentionState::Engaged);
        assert!(c.surface().calls.is_empty());
        assert!(c.current_clip().is_none());
    }

    #[test]
    fn test_attentive_while_engaged_is_noop() {
        let mut c = controller();
        assert_eq!(c.apply(true), None);
        assert!(c.surface().calls.is_empty());
    }

    #[test]
    fn test_repeated_look_away_shows_once() {
        let mut c = controller();
        let actions = apply_all(&mut c, &[false, false, false]);
        assert_eq!(actions, vec![PlaybackAction::ShowAndPlay]);
        assert_eq!(c.surface().calls, vec![Call::Show, Call::Play]);
        assert_eq!(c.state(), AttentionState::Diverted);
    }

    #[test]
    fn test_alternation() {
        let mut c = controller();
        let actions = apply_all(&mut c, &[false, true, false]);
        assert_eq!(
            actions,
            vec![
                PlaybackAction::ShowAndPlay,
                PlaybackAction::HideAndPause,
                PlaybackAction::ShowAndPlay
            ]
        );
        assert_eq!(
            c.surface().calls,
            vec![Call::Show, Call::Play, Call::Hide, Call::Pause, Call::Show, Call::Play]
        );
    }

    #[test]
    fn test_select_while_engaged_only_loads() {
        let mut c = controller();
        c.select(MediaClip::new("intro", "intro.mp4")).unwrap();
        assert_eq!(c.surface().calls, vec![Call::Stop, Call::Load("intro".into())]);
        assert_eq!(c.state(), AttentionState::Engaged);
        assert_eq!(c.current_clip().unwrap().name(), "intro");
    }

    #[test]
    fn test_select_while_diverted_plays_new_clip() {
        let mut c = controller();
        c.apply(false);
        c.select(MediaClip::new("second", "second.mp4")).unwrap();
        assert_eq!(
            c.surface().calls,
            vec![
                Call::Show,
                Call::Play,
                Call::Stop,
                Call::Load("second".into()),
                Call::Show,
                Call::Play
            ]
        );
        assert_eq!(c.state(), AttentionState::Diverted);
    }

    #[test]
    fn test_failed_select_leaves_no_clip() {
        let mut c = PlaybackController::new(RecordingSurface {
            fail_load: true,
            ..Default::default()
        });
        assert!(c.select(MediaClip::new("broken", "missing.mp4")).is_err());
        assert!(c.current_clip().is_none());
        assert_eq!(c.state(), AttentionState::Engaged);
    }

    #[test]
    fn test_shutdown_stops_media() {
        let mut c = controller();
        c.select(MediaClip::new("intro", "intro.mp4")).unwrap();
        c.shutdown();
        assert_eq!(c.surface().calls.last(), Some(&Call::Stop));
        assert!(c.current_clip().is_none());
    }
}
