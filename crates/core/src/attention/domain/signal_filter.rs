/// Post-processes the raw per-frame attention signal before dispatch.
pub trait SignalFilter: Send {
    fn filter(&mut self, attentive: bool) -> bool;
}

/// Forwards every reading unchanged.
pub struct Passthrough;

impl SignalFilter for Passthrough {
    fn filter(&mut self, attentive: bool) -> bool {
        attentive
    }
}

/// Debounces the signal: the output only flips after `required` consecutive
/// readings disagree with it.
///
/// Starts out attentive, so nothing is diverted until the viewer has been
/// seen looking away for the full window. `required == 1` behaves like
/// [`Passthrough`].
pub struct ConfirmationWindow {
    required: u32,
    emitted: bool,
    streak: u32,
}

impl ConfirmationWindow {
    pub fn new(required: u32) -> Result<Self, &'static str> {
        if required < 1 {
            return Err("required must be >= 1");
        }
        Ok(Self {
            required,
            emitted: true,
            streak: 0,
        })
    }

    pub fn required(&self) -> u32 {
        self.required
    }
}

impl SignalFilter for ConfirmationWindow {
    fn filter(&mut self, attentive: bool) -> bool {
        if attentive == self.emitted {
            self.streak = 0;
            return self.emitted;
        }
        self.streak += 1;
        if self.streak >= self.required {
            self.emitted = attentive;
            self.streak = 0;
        }
        self.emitted
    }
}
