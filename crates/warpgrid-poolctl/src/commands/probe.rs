use std::path::Path;
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use warpgrid_pool::{PoolFile, PoolManager, TcpConnectionFactory};

pub fn probe(path: &str, workers: usize, iterations: usize) -> anyhow::Result<()> {
    let file = PoolFile::from_file(Path::new(path))
        .with_context(|| format!("loading pool file {path}"))?;
    let query = file.pool.ping_query.clone();
    let pool = Arc::new(PoolManager::from_file(
        file,
        Arc::new(TcpConnectionFactory::default()),
    ));

    tracing::info!(workers, iterations, "starting probe");
    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            let pool = Arc::clone(&pool);
            let query = query.clone();
            thread::spawn(move || -> anyhow::Result<usize> {
                let mut failures = 0;
                for _ in 0..iterations {
                    let conn = pool.get().context("acquiring connection")?;
                    if let Err(e) = conn.execute(&query) {
                        tracing::warn!(worker, connection = conn.id(), error = %e, "query failed");
                        failures += 1;
                    }
                }
                Ok(failures)
            })
        })
        .collect();

    let mut failures = 0;
    let mut first_error = None;
    for handle in handles {
        let outcome = handle
            .join()
            .unwrap_or_else(|_| Err(anyhow::anyhow!("probe worker panicked")));
        match outcome {
            Ok(n) => failures += n,
            Err(e) if first_error.is_none() => first_error = Some(e),
            Err(e) => tracing::warn!(error = %e, "probe worker failed"),
        }
    }

    println!("{}", pool.report());
    pool.shutdown();

    if let Some(e) = first_error {
        return Err(e);
    }
    println!("✓ {} queries, {failures} failed", workers * iterations);
    Ok(())
}
