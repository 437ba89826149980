use crate::shared::region::Region;

/// Merges clusters of overlapping detections the way OpenCV's
/// `groupRectangles` does.
///
/// Rectangles are clustered by similarity (edges within `eps` of the smaller
/// size), each cluster is averaged, and clusters with `min_neighbors` or
/// fewer members are discarded. A surviving cluster nested inside a
/// noticeably stronger one is dropped as well. With `min_neighbors == 0`
/// the input is returned unchanged.
pub fn group_rectangles(rects: &[Region], min_neighbors: usize, eps: f64) -> Vec<Region> {
    if min_neighbors == 0 || rects.is_empty() {
        return rects.to_vec();
    }

    let labels = partition(rects, |a, b| similar(a, b, eps));
    let classes = labels.iter().copied().max().map_or(0, |m| m + 1);

    let mut sums = vec![[0.0f64; 4]; classes];
    let mut counts = vec![0usize; classes];
    for (r, &label) in rects.iter().zip(&labels) {
        let s = &mut sums[label];
        s[0] += r.x as f64;
        s[1] += r.y as f64;
        s[2] += r.width as f64;
        s[3] += r.height as f64;
        counts[label] += 1;
    }

    let averaged: Vec<Region> = sums
        .iter()
        .zip(&counts)
        .map(|(s, &n)| {
            let inv = 1.0 / n as f64;
            Region::new(
                (s[0] * inv).round() as u32,
                (s[1] * inv).round() as u32,
                (s[2] * inv).round() as u32,
                (s[3] * inv).round() as u32,
            )
        })
        .collect();

    let mut kept = Vec::new();
    for (i, r1) in averaged.iter().enumerate() {
        let n1 = counts[i];
        if n1 <= min_neighbors {
            continue;
        }
        let swallowed = averaged.iter().enumerate().any(|(j, r2)| {
            let n2 = counts[j];
            if j == i || n2 <= min_neighbors {
                return false;
            }
            let dx = (r2.width as f64 * eps).round() as i64;
            let dy = (r2.height as f64 * eps).round() as i64;
            let inside = r1.x as i64 >= r2.x as i64 - dx
                && r1.y as i64 >= r2.y as i64 - dy
                && r1.right() as i64 <= r2.right() as i64 + dx
                && r1.bottom() as i64 <= r2.bottom() as i64 + dy;
            inside && (n2 > n1.max(3) || n1 < 3)
        });
        if !swallowed {
            kept.push(*r1);
        }
    }
    kept
}

fn similar(a: &Region, b: &Region, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f64 * 0.5;
    let close = |p: u32, q: u32| (p as f64 - q as f64).abs() <= delta;
    close(a.x, b.x)
        && close(a.y, b.y)
        && close(a.right(), b.right())
        && close(a.bottom(), b.bottom())
}

/// Labels the transitive closure of `same`, numbering classes from zero in
/// order of first appearance.
fn partition(items: &[Region], same: impl Fn(&Region, &Region) -> bool) -> Vec<usize> {
    let mut parent: Vec<usize> = (0..items.len()).collect();

    fn root(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..items.len() {
        for j in (i + 1)..items.len() {
            if same(&items[i], &items[j]) {
                let (a, b) = (root(&mut parent, i), root(&mut parent, j));
                if a != b {
                    parent[b] = a;
                }
            }
        }
    }

    let mut class_of_root = vec![usize::MAX; items.len()];
    let mut next = 0;
    (0..items.len())
        .map(|i| {
            let r = root(&mut parent, i);
            if class_of_root[r] == usize::MAX {
                class_of_root[r] = next;
                next += 1;
            }
            class_of_root[r]
        })
        .collect()
}
