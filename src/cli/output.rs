//! JSON-lines output on stdout

use std::io::{self, Write};

use serde::Serialize;

/// Write each row as one JSON object per line
pub fn print_rows<T: Serialize>(rows: &[T]) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_rows(&mut out, rows)?;
    out.flush()?;
    Ok(())
}

fn write_rows<W: Write, T: Serialize>(out: &mut W, rows: &[T]) -> anyhow::Result<()> {
    for row in rows {
        serde_json::to_writer(&mut *out, row)?;
        out.write_all(b"\n")?;
    }
    Ok(())
}
