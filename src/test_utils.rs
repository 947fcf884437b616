use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::forward_backward::{ChainShape, WeightLayout};
use crate::hashing::{self, HashedSequence};
use crate::store::Item;

macro_rules! hashmap {
    ( $($k:expr => $v:expr,)* ) => {
        {
            #[allow(unused_mut)]
            let mut h = HashMap::new();
            $(
                h.insert($k, $v);
            )*
            h
        }
    };
    ( $($k:expr => $v:expr),* ) => {
        hashmap![$( $k => $v, )*]
    };
}

macro_rules! logsumexp {
    ( $($x:expr,)* ) => {
        $crate::math::logsumexp([$( $x, )*])
    };
    ( $($x:expr),* ) => {
        logsumexp!($( $x, )*)
    };
}

pub fn item(label: &str, features: &[(&str, f32)]) -> Item {
    Item::new(
        Some(label),
        features.iter().map(|&(k, _)| k.to_string()).collect(),
        features.iter().map(|&(_, v)| v).collect(),
    )
}

/// All `labels^len` label sequences in lexicographic order.
pub fn enumerate_paths(len: usize, labels: usize) -> Vec<Vec<u32>> {
    let mut paths = vec![vec![]];
    for _ in 0..len {
        paths = paths
            .into_iter()
            .flat_map(|p| {
                (0..labels as u32).map(move |k| {
                    let mut p = p.clone();
                    p.push(k);
                    p
                })
            })
            .collect();
    }
    paths
}

/// Random chain with random weights, hashed into a 16-dimensional state block.
pub struct Fixture {
    pub layout: WeightLayout,
    pub nz: Vec<u32>,
    pub keys: Vec<u32>,
    pub values: Vec<f32>,
    pub path: Vec<u32>,
    pub weights: Vec<f32>,
    starts: Vec<u32>,
    hashed_values: Vec<f32>,
    hashed_indices: Vec<u32>,
}

impl Fixture {
    pub fn random(len: usize, labels: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let layout = WeightLayout {
            state_dimension: 16,
            number_of_states: labels,
        };
        let nz: Vec<u32> = (0..len).map(|_| rng.gen_range(1..=3)).collect();
        let total = nz.iter().sum::<u32>() as usize;
        let keys = (0..total).map(|_| rng.gen_range(0..1000)).collect();
        let values = (0..total).map(|_| rng.gen_range(0.5..1.5)).collect();
        let path = (0..len).map(|_| rng.gen_range(0..labels as u32)).collect();
        let weights = (0..layout.len()).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let mut fixture = Self {
            layout,
            nz,
            keys,
            values,
            path,
            weights,
            starts: vec![0; len + 1],
            hashed_values: vec![0.0; total * labels],
            hashed_indices: vec![0; total * labels],
        };
        hashing::feature_hashing_sequence(
            &fixture.nz,
            &fixture.values,
            &fixture.keys,
            labels,
            layout.state_dimension as u32,
            &mut fixture.starts,
            &mut fixture.hashed_values,
            &mut fixture.hashed_indices,
        );
        fixture
    }

    pub fn shape(&self) -> ChainShape {
        ChainShape {
            len: self.nz.len(),
            labels: self.layout.number_of_states,
        }
    }

    pub fn hashed(&self) -> HashedSequence<'_> {
        HashedSequence {
            labels: self.layout.number_of_states,
            nz: &self.nz,
            starts: &self.starts,
            values: &self.hashed_values,
            indices: &self.hashed_indices,
        }
    }
}

pub(crate) use hashmap;
pub(crate) use logsumexp;
