use crate::forward_backward::ChainShape;

/// Finds the highest-scoring label sequence.
///
/// `best` and `back` need `shape.states()` elements, `path` needs `shape.len`.
/// Ties resolve to the lowest label index. Returns the raw score of the path;
/// subtract the log partition function to get its log-probability.
pub fn viterbi(
    shape: ChainShape,
    feature: &[f32],
    best: &mut [f32],
    back: &mut [u32],
    path: &mut [u32],
) -> f32 {
    let n = shape.labels;
    for k in 0..n {
        best[k] = feature[shape.cell(0, k, shape.start())];
    }
    for t in 1..shape.len {
        let (done, rest) = best.split_at_mut(t * n);
        let prev = &done[(t - 1) * n..];
        for k in 0..n {
            let mut max = f32::NEG_INFINITY;
            let mut arg = 0;
            for (p, &score) in prev.iter().enumerate() {
                let s = score + feature[shape.cell(t, k, p)];
                if s > max {
                    max = s;
                    arg = p;
                }
            }
            rest[k] = max;
            back[t * n + k] = arg as u32;
        }
    }

    let last = (shape.len - 1) * n;
    let mut max = f32::NEG_INFINITY;
    let mut arg = 0;
    for (k, &s) in best[last..last + n].iter().enumerate() {
        if s > max {
            max = s;
            arg = k;
        }
    }
    path[shape.len - 1] = arg as u32;
    for t in (1..shape.len).rev() {
        path[t - 1] = back[t * n + path[t] as usize];
    }
    max
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::forward_backward::{self, Workspace};
    use crate::test_utils::{enumerate_paths, Fixture};

    fn decode(shape: ChainShape, feature: &[f32]) -> (Vec<u32>, f32) {
        let mut best = vec![0.0; shape.states()];
        let mut back = vec![0; shape.states()];
        let mut path = vec![0; shape.len];
        let score = viterbi(shape, feature, &mut best, &mut back, &mut path);
        (path, score)
    }

    #[test]
    fn test_viterbi_matches_brute_force() {
        for labels in 1..=3 {
            for len in 1..=4 {
                let fixture = Fixture::random(len, labels, (labels * 10 + len) as u64);
                let shape = fixture.shape();
                let mut state = vec![0.0; shape.states()];
                let mut feature = vec![0.0; shape.cells()];
                let mut forward = vec![0.0; shape.states()];
                let mut backward = vec![0.0; shape.states()];
                let mut ws = Workspace {
                    state: &mut state,
                    feature: &mut feature,
                    forward: &mut forward,
                    backward: &mut backward,
                };
                let z = forward_backward::forward_backward(
                    shape,
                    &fixture.layout,
                    &fixture.hashed(),
                    &fixture.weights,
                    &mut ws,
                );

                let (path, score) = decode(shape, &feature);
                let mut expected_path = vec![];
                let mut expected = f32::NEG_INFINITY;
                for p in enumerate_paths(len, labels) {
                    let s = forward_backward::path_score(shape, &feature, &p);
                    if s > expected {
                        expected = s;
                        expected_path = p;
                    }
                }
                assert_eq!(expected_path, path);
                assert!((expected - score).abs() < 1e-5);
                assert!(score - z <= 0.0);
            }
        }
    }

    #[test]
    fn test_viterbi_ties_prefer_lowest_label() {
        let shape = ChainShape { len: 3, labels: 3 };
        let mut feature = vec![f32::NEG_INFINITY; shape.cells()];
        for t in 0..3 {
            for k in 0..3 {
                if t == 0 {
                    feature[shape.cell(0, k, shape.start())] = 0.0;
                } else {
                    for p in 0..3 {
                        feature[shape.cell(t, k, p)] = 0.0;
                    }
                }
            }
        }
        let (path, score) = decode(shape, &feature);
        assert_eq!(vec![0, 0, 0], path);
        assert_eq!(0.0, score);

        feature[shape.cell(2, 2, 1)] = 1.0;
        let (path, score) = decode(shape, &feature);
        assert_eq!(vec![0, 1, 2], path);
        assert_eq!(1.0, score);
    }
}
