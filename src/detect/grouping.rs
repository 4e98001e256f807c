//! Neighbor grouping of raw cascade hits.
//!
//! A true face fires the cascade at many nearby positions and scales; a false
//! positive usually fires a handful of times. Hits are clustered by relative
//! similarity, clusters with too few members are dropped, and each surviving
//! cluster collapses to its average box.

use super::result::FaceBox;

const GROUP_EPS: f64 = 0.2;

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[rb] = ra;
        }
    }
}

fn similar(a: &FaceBox, b: &FaceBox) -> bool {
    let delta = GROUP_EPS * (a.width.min(b.width) + a.height.min(b.height)) as f64 * 0.5;
    let close = |p: u32, q: u32| (p as f64 - q as f64).abs() <= delta;
    close(a.x, b.x) && close(a.y, b.y) && close(a.right(), b.right()) && close(a.bottom(), b.bottom())
}

/// Cluster hits; keep clusters with more than `min_neighbors` members.
/// `min_neighbors == 0` returns the raw hits unchanged.
pub(crate) fn group_boxes(raw: &[FaceBox], min_neighbors: u32) -> Vec<FaceBox> {
    if min_neighbors == 0 || raw.is_empty() {
        return raw.to_vec();
    }

    let mut sets = DisjointSet::new(raw.len());
    for i in 0..raw.len() {
        for j in (i + 1)..raw.len() {
            if similar(&raw[i], &raw[j]) {
                sets.union(i, j);
            }
        }
    }

    // root -> (members, sum x, sum y, sum w, sum h)
    let mut clusters: Vec<(usize, u32, [u64; 4])> = Vec::new();
    for (i, b) in raw.iter().enumerate() {
        let root = sets.find(i);
        let idx = match clusters.iter().position(|(r, _, _)| *r == root) {
            Some(idx) => idx,
            None => {
                clusters.push((root, 0, [0; 4]));
                clusters.len() - 1
            }
        };
        let entry = &mut clusters[idx];
        entry.1 += 1;
        entry.2[0] += b.x as u64;
        entry.2[1] += b.y as u64;
        entry.2[2] += b.width as u64;
        entry.2[3] += b.height as u64;
    }

    let averaged: Vec<(FaceBox, u32)> = clusters
        .into_iter()
        .filter(|(_, n, _)| *n > min_neighbors)
        .map(|(_, n, sums)| {
            let avg = |s: u64| ((s as f64) / n as f64).round() as u32;
            (
                FaceBox::new(avg(sums[0]), avg(sums[1]), avg(sums[2]), avg(sums[3])),
                n,
            )
        })
        .collect();

    // Drop boxes sitting inside a stronger box.
    averaged
        .iter()
        .enumerate()
        .filter(|(i, (inner, n1))| {
            !averaged.iter().enumerate().any(|(j, (outer, n2))| {
                if *i == j || !(*n2 > (*n1).max(3) || *n1 < 3) {
                    return false;
                }
                let dx = (outer.width as f64 * GROUP_EPS).round() as i64;
                let dy = (outer.height as f64 * GROUP_EPS).round() as i64;
                inner.x as i64 >= outer.x as i64 - dx
                    && inner.y as i64 >= outer.y as i64 - dy
                    && inner.right() as i64 <= outer.right() as i64 + dx
                    && inner.bottom() as i64 <= outer.bottom() as i64 + dy
            })
        })
        .map(|(_, (b, _))| *b)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jittered(x: u32, y: u32, size: u32, count: u32) -> Vec<FaceBox> {
        (0..count)
            .map(|k| FaceBox::new(x + k % 3, y + k % 2, size + k % 2, size))
            .collect()
    }

    #[test]
    fn zero_neighbors_keeps_raw_hits() {
        let raw = jittered(10, 10, 40, 4);
        assert_eq!(group_boxes(&raw, 0), raw);
    }

    #[test]
    fn weak_clusters_are_dropped() {
        let mut raw = jittered(10, 10, 40, 8);
        raw.extend(jittered(200, 200, 40, 2));
        let grouped = group_boxes(&raw, 5);
        assert_eq!(grouped.len(), 1);
        let face = grouped[0];
        assert!(face.x >= 10 && face.x <= 12);
        assert!(face.width >= 40 && face.width <= 41);
    }

    #[test]
    fn separate_faces_stay_separate() {
        let mut raw = jittered(10, 10, 40, 6);
        raw.extend(jittered(300, 40, 60, 6));
        assert_eq!(group_boxes(&raw, 3).len(), 2);
    }

    #[test]
    fn nested_weaker_box_is_removed() {
        let mut raw = jittered(100, 100, 120, 10);
        raw.extend(jittered(130, 130, 40, 4));
        let grouped = group_boxes(&raw, 2);
        assert_eq!(grouped.len(), 1);
        assert!(grouped[0].width >= 120);
    }
}
