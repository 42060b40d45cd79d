use std::sync::Arc;

use rand::Rng;
use thiserror::Error;

/// Jokes bundled with the binary, used when no joke file is configured.
pub const BUNDLED_JOKES: &str = include_str!("../data/jokes.txt");

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum JokeStoreError {
    #[error("joke collection is empty")]
    Empty,
}

/// Immutable, non-empty collection of jokes.
#[derive(Clone, Debug)]
pub struct JokeStore {
    jokes: Arc<[String]>,
}

impl JokeStore {
    pub fn new(jokes: Vec<String>) -> Result<Self, JokeStoreError> {
        let jokes: Vec<String> = jokes
            .into_iter()
            .map(|joke| joke.trim().to_owned())
            .filter(|joke| !joke.is_empty())
            .collect();

        if jokes.is_empty() {
            return Err(JokeStoreError::Empty);
        }

        Ok(Self { jokes: jokes.into() })
    }

    /// One joke per line; blank lines and `#` comments are skipped.
    pub fn from_text(raw: &str) -> Result<Self, JokeStoreError> {
        Self::new(
            raw.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_owned)
                .collect(),
        )
    }

    pub fn bundled() -> Result<Self, JokeStoreError> {
        Self::from_text(BUNDLED_JOKES)
    }

    pub fn pick_random(&self) -> &str {
        self.pick_with(&mut rand::thread_rng())
    }

    pub fn pick_with<R>(&self, rng: &mut R) -> &str
    where
        R: Rng,
    {
        // non-empty by construction
        let index = rng.gen_range(0..self.jokes.len());
        &self.jokes[index]
    }

    pub fn len(&self) -> usize {
        self.jokes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jokes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.jokes.iter().map(String::as_str)
    }
}
