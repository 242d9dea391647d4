use crate::StreamlineError;

/// Environment variable consulted when no explicit worker count is given.
pub const NUM_THREADS_ENV: &str = "RAYON_NUM_THREADS";

/// Resolve the number of worker threads to use.
///
/// * `None` - the value of `RAYON_NUM_THREADS` if set to a positive integer, otherwise all
///   available cpus.
/// * `Some(n)` with `n > 0` - exactly `n` workers.
/// * `Some(n)` with `n < 0` - all available cpus minus `|n + 1|` (at least one), so `-1`
///   means every cpu.
/// * `Some(0)` - an error.
pub fn determine_num_threads(num_threads: Option<i32>) -> Result<usize, StreamlineError> {
    let available = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    match num_threads {
        Some(0) => Err(StreamlineError::InvalidNumThreads),
        Some(n) if n > 0 => Ok(n as usize),
        Some(n) => Ok((available as i64 + n as i64 + 1).max(1) as usize),
        None => Ok(std::env::var(NUM_THREADS_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(available)),
    }
}

/// Build a dedicated worker pool sized with [`determine_num_threads`].
pub fn build_thread_pool(num_threads: Option<i32>) -> Result<rayon::ThreadPool, StreamlineError> {
    let n = determine_num_threads(num_threads)?;
    log::debug!("Building distance thread pool with {} workers", n);
    Ok(rayon::ThreadPoolBuilder::new().num_threads(n).build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_determine_num_threads() -> Result<(), StreamlineError> {
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        assert!(matches!(
            determine_num_threads(Some(0)),
            Err(StreamlineError::InvalidNumThreads)
        ));
        assert_eq!(determine_num_threads(Some(3))?, 3);
        assert_eq!(determine_num_threads(Some(-1))?, available);
        assert_eq!(
            determine_num_threads(Some(-2))?,
            available.saturating_sub(1).max(1)
        );
        assert_eq!(determine_num_threads(Some(-10_000))?, 1);
        assert!(determine_num_threads(None)? >= 1);
        Ok(())
    }

    #[test]
    fn test_build_thread_pool() -> Result<(), StreamlineError> {
        let pool = build_thread_pool(Some(2))?;
        assert_eq!(pool.current_num_threads(), 2);
        Ok(())
    }
}
