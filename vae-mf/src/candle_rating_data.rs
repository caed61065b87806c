use anyhow::anyhow;
use candle_core::{Device, Tensor};
use nalgebra::DMatrix;
use nalgebra_sparse::CsrMatrix;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Uniform};
use rayon::prelude::*;

/// A user x item rating matrix; zero entries are unobserved
pub trait RatingMatrix: Sync {
    fn num_users(&self) -> usize;

    fn num_items(&self) -> usize;

    /// ratings given by user `u` (length: number of items)
    fn user_row(&self, u: usize) -> Vec<f32>;

    /// ratings received by item `i` (length: number of users)
    fn item_column(&self, i: usize) -> Vec<f32>;

    fn rating(&self, u: usize, i: usize) -> f32;

    /// `(user, item)` coordinates of the nonzero entries in
    /// row-major order
    fn nonzero_coordinates(&self) -> Vec<(usize, usize)>;
}

impl RatingMatrix for DMatrix<f32> {
    fn num_users(&self) -> usize {
        self.nrows()
    }

    fn num_items(&self) -> usize {
        self.ncols()
    }

    fn user_row(&self, u: usize) -> Vec<f32> {
        self.row(u).iter().copied().collect()
    }

    fn item_column(&self, i: usize) -> Vec<f32> {
        self.column(i).iter().copied().collect()
    }

    fn rating(&self, u: usize, i: usize) -> f32 {
        self[(u, i)]
    }

    fn nonzero_coordinates(&self) -> Vec<(usize, usize)> {
        (0..self.nrows())
            .flat_map(|u| (0..self.ncols()).map(move |i| (u, i)))
            .filter(|&(u, i)| self[(u, i)] != 0.)
            .collect()
    }
}

impl RatingMatrix for CsrMatrix<f32> {
    fn num_users(&self) -> usize {
        self.nrows()
    }

    fn num_items(&self) -> usize {
        self.ncols()
    }

    fn user_row(&self, u: usize) -> Vec<f32> {
        let mut ret = vec![0_f32; self.ncols()];
        let row = self.row(u);
        for (&i, &x) in row.col_indices().iter().zip(row.values().iter()) {
            ret[i] = x;
        }
        ret
    }

    fn item_column(&self, i: usize) -> Vec<f32> {
        (0..self.nrows()).map(|u| self.rating(u, i)).collect()
    }

    fn rating(&self, u: usize, i: usize) -> f32 {
        self.get_entry(u, i)
            .map(|entry| entry.into_value())
            .unwrap_or(0.)
    }

    fn nonzero_coordinates(&self) -> Vec<(usize, usize)> {
        self.triplet_iter()
            .filter(|(_, _, x)| **x != 0.)
            .map(|(u, i, _)| (u, i))
            .collect()
    }
}

///
/// Observed coordinates split into a training prefix and a
/// held-out suffix. The split keeps the matrix order; only the
/// minibatch sampling is random.
///
pub struct RatingSplit {
    pub train: Vec<(usize, usize)>,
    pub held_out: Vec<(usize, usize)>,
}

impl RatingSplit {
    /// The first `floor(n * train_prop)` coordinates go to training
    pub fn new(mut coordinates: Vec<(usize, usize)>, train_prop: f64) -> Self {
        let train_size = ((coordinates.len() as f64) * train_prop).floor() as usize;
        let train_size = train_size.min(coordinates.len());
        let held_out = coordinates.split_off(train_size);
        Self {
            train: coordinates,
            held_out,
        }
    }

    pub fn from_matrix<M: RatingMatrix>(ratings: &M, train_prop: f64) -> Self {
        Self::new(ratings.nonzero_coordinates(), train_prop)
    }
}

///
/// Draw `batch_size` coordinates uniformly with replacement; an
/// empty `train` is an error
///
pub fn sample_minibatch(
    train: &[(usize, usize)],
    batch_size: usize,
    rng: &mut StdRng,
) -> anyhow::Result<Vec<(usize, usize)>> {
    let unif = Uniform::new(0, train.len())?;
    Ok((0..batch_size).map(|_| train[unif.sample(rng)]).collect())
}

/// Tensors fed to the model for a set of (user, item) pairs
pub struct RatingFeed {
    /// user profiles (n x number of items)
    pub user_nd: Tensor,
    /// item profiles (n x number of users)
    pub item_nd: Tensor,
    /// observed ratings (n)
    pub rating_n: Tensor,
}

impl RatingFeed {
    ///
    /// Slice the matrix rows at the users and the columns at the
    /// items, one row per pair
    ///
    pub fn new<M: RatingMatrix>(
        ratings: &M,
        pairs: &[(usize, usize)],
        target_device: &Device,
    ) -> anyhow::Result<Self> {
        let (n_users, n_items) = (ratings.num_users(), ratings.num_items());
        let nn = pairs.len();
        if nn == 0 {
            return Err(anyhow!("empty set of rating pairs"));
        }
        if let Some(&(u, i)) = pairs.iter().find(|&&(u, i)| u >= n_users || i >= n_items) {
            return Err(anyhow!(
                "pair ({}, {}) out of range for a {} x {} rating matrix",
                u,
                i,
                n_users,
                n_items
            ));
        }

        let user_data = pairs
            .par_iter()
            .map(|&(u, _)| ratings.user_row(u))
            .collect::<Vec<_>>()
            .concat();

        let item_data = pairs
            .par_iter()
            .map(|&(_, i)| ratings.item_column(i))
            .collect::<Vec<_>>()
            .concat();

        let rating_data = pairs
            .iter()
            .map(|&(u, i)| ratings.rating(u, i))
            .collect::<Vec<_>>();

        Ok(Self {
            user_nd: Tensor::from_vec(user_data, (nn, n_items), target_device)?,
            item_nd: Tensor::from_vec(item_data, (nn, n_users), target_device)?,
            rating_n: Tensor::from_vec(rating_data, nn, target_device)?,
        })
    }

    /// number of (user, item) pairs
    pub fn num_pairs(&self) -> usize {
        self.rating_n.dims().first().copied().unwrap_or(0)
    }
}
