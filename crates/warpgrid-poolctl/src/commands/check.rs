use std::path::Path;

use anyhow::Context;
use warpgrid_pool::{Fingerprint, PoolFile};

pub fn check(path: &str) -> anyhow::Result<()> {
    let rendered = render(Path::new(path))?;
    println!("{rendered}");
    Ok(())
}

/// Load and validate `path`, returning the effective configuration as TOML
/// with the password masked.
fn render(path: &Path) -> anyhow::Result<String> {
    let file = PoolFile::from_file(path)
        .with_context(|| format!("loading pool file {}", path.display()))?;
    let fingerprint = Fingerprint::of(&file.datasource).to_hex();
    let toml = file.redacted().to_toml_string()?;
    Ok(format!("# fingerprint {fingerprint}\n{toml}"))
}
