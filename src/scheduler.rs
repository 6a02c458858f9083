//! Task scheduling for the tile pipelines.
//!
//! A thin layer over a work-stealing pool: stages submit batches of
//! independent tasks and join before the next dependent stage starts.
//! Worker count 1 (or the `threads` feature disabled) degrades to plain
//! inline execution on the calling thread. Cancellation is cooperative:
//! every task checks the shared success flag and the join reports the
//! first error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::{Error, Result};

pub(crate) struct Scheduler {
  #[cfg(feature = "threads")]
  pool: Option<rayon_core::ThreadPool>,
}

impl Scheduler {
  pub fn new(num_threads: usize) -> Result<Self> {
    #[cfg(feature = "threads")]
    {
      let pool = if num_threads > 1 {
        Some(
          rayon_core::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .map_err(|_| Error::OutOfMemory)?,
        )
      } else {
        None
      };
      Ok(Self { pool })
    }
    #[cfg(not(feature = "threads"))]
    {
      let _ = num_threads;
      Ok(Self {})
    }
  }

  /// Run `f` over every element, possibly in parallel, stopping early on
  /// failure. Returns the first error observed.
  pub fn for_each_mut<T, F>(&self, items: &mut [T], f: F) -> Result<()>
  where
    T: Send,
    F: Fn(usize, &mut T) -> Result<()> + Sync,
  {
    let success = AtomicBool::new(true);
    let first_error: Mutex<Option<Error>> = Mutex::new(None);
    self.run_slice(items, 0, &success, &first_error, &f);
    match first_error.into_inner() {
      Ok(Some(e)) => Err(e),
      _ => Ok(()),
    }
  }

  fn run_slice<T, F>(
    &self,
    items: &mut [T],
    base: usize,
    success: &AtomicBool,
    first_error: &Mutex<Option<Error>>,
    f: &F,
  ) where
    T: Send,
    F: Fn(usize, &mut T) -> Result<()> + Sync,
  {
    #[cfg(feature = "threads")]
    if let Some(pool) = &self.pool {
      if items.len() > 1 {
        let mid = items.len() / 2;
        let (lo, hi) = items.split_at_mut(mid);
        pool.install(|| {
          rayon_core::join(
            || self.run_slice(lo, base, success, first_error, f),
            || self.run_slice(hi, base + mid, success, first_error, f),
          )
        });
        return;
      }
    }
    for (i, item) in items.iter_mut().enumerate() {
      if !success.load(Ordering::Relaxed) {
        return;
      }
      if let Err(e) = f(base + i, item) {
        success.store(false, Ordering::Relaxed);
        let mut slot = match first_error.lock() {
          Ok(s) => s,
          Err(p) => p.into_inner(),
        };
        if slot.is_none() {
          *slot = Some(e);
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sequential_fallback() {
    let sched = Scheduler::new(1).unwrap();
    let mut items: Vec<u32> = (0..100).collect();
    sched
      .for_each_mut(&mut items, |i, v| {
        *v += i as u32;
        Ok(())
      })
      .unwrap();
    assert_eq!(items[10], 20);
  }

  #[test]
  fn parallel_run_and_error_propagation() {
    let sched = Scheduler::new(4).unwrap();
    let mut items: Vec<u32> = (0..64).collect();
    let r = sched.for_each_mut(&mut items, |_, v| {
      if *v == 40 {
        Err(Error::CorruptPacketData)
      } else {
        *v *= 2;
        Ok(())
      }
    });
    assert_eq!(r, Err(Error::CorruptPacketData));
  }
}
