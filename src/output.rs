use std::io::{self, Write};

use serde::Serialize;

use crate::ontology::CacheStats;
use crate::pipeline::BatchResult;

#[derive(Debug, Clone, Serialize)]
pub struct CacheClearReport {
    pub cleared: Vec<&'static str>,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_batch(result: &BatchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_stats(stats: &[CacheStats]) -> io::Result<()> {
        Self::print_json(&stats)
    }

    pub fn print_clear(report: &CacheClearReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
