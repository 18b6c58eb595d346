use anyhow::{bail, Context, Result};
use chrono::{Duration, NaiveDate};
use std::{fs, path::Path};

use crate::window::{gauge_stamp, grid_stamp, long_date, RunWindow};

const START_DATE: &str = "Start Date";
const FORECAST_DATE: &str = "Forecast Date";
const END_DATE: &str = "End Date";
const DSS_PATHNAME: &str = "DSS Pathname";
const GAGE_BLOCK: &str = "Gage:";
const BLOCK_END: &str = "End:";
const FIELD_INDENT: &str = "       ";

/// Reemplaza el campo que sigue al primer ':' (hasta el siguiente ':', si lo hay).
fn replace_after_colon(line: &str, value: &str) -> Result<String> {
    let mut parts: Vec<&str> = line.split(':').collect();
    if parts.len() < 2 {
        bail!("la línea {line:?} no tiene ':'");
    }
    let replacement = format!(" {value}");
    parts[1] = &replacement;
    Ok(parts.join(":"))
}

/// Especificación de pronóstico: fechas de inicio, pronóstico y fin.
pub fn patch_forecast_window(text: &str, window: &RunWindow) -> Result<String> {
    let anchors = [
        (START_DATE, long_date(window.start)),
        (FORECAST_DATE, long_date(window.reference)),
        (END_DATE, long_date(window.end)),
    ];
    let mut found = [false; 3];

    let mut lines: Vec<String> = Vec::new();
    for line in text.split('\n') {
        let hit = anchors.iter().position(|(anchor, _)| line.contains(anchor));
        match hit {
            Some(i) => {
                found[i] = true;
                lines.push(replace_after_colon(line, &anchors[i].1)?);
            }
            None => lines.push(line.to_string()),
        }
    }

    for (i, ok) in found.iter().enumerate() {
        if !ok {
            bail!("no se encontró la línea '{}'", anchors[i].0);
        }
    }

    Ok(lines.join("\n"))
}

/// Especificación de grilla: en cada línea `DSS Pathname` los campos 4 y 5
/// (separados por '/') pasan a start-1 día y start.
pub fn patch_grid_source(text: &str, start: NaiveDate) -> Result<String> {
    let from = grid_stamp(start - Duration::days(1));
    let to = grid_stamp(start);

    let mut patched = 0;
    let mut lines: Vec<String> = Vec::new();
    for line in text.split('\n') {
        if line.contains(DSS_PATHNAME) {
            let mut fields: Vec<&str> = line.split('/').collect();
            if fields.len() < 6 {
                bail!("pathname con menos de 6 campos: {line:?}");
            }
            fields[4] = &from;
            fields[5] = &to;
            lines.push(fields.join("/"));
            patched += 1;
        } else {
            lines.push(line.to_string());
        }
    }

    if patched == 0 {
        bail!("no se encontró ninguna línea '{DSS_PATHNAME}'");
    }
    Ok(lines.join("\n"))
}

/// Especificación de gauges: en cada bloque `Gage:` (hasta su `End:`) la
/// cuarta y tercera línea contando desde el final son Start Time / End Time.
pub fn patch_gauge_window(text: &str, start: NaiveDate, reference: NaiveDate) -> Result<String> {
    let start_line = format!("{FIELD_INDENT}Start Time: {}", gauge_stamp(start));
    let end_line = format!("{FIELD_INDENT}End Time: {}", gauge_stamp(reference));

    let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
    let gage_idx: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| l.contains(GAGE_BLOCK))
        .map(|(i, _)| i)
        .collect();

    if gage_idx.is_empty() {
        bail!("no se encontró ningún bloque '{GAGE_BLOCK}'");
    }

    for g in gage_idx {
        let end = lines[g..]
            .iter()
            .position(|l| l.contains(BLOCK_END))
            .map(|off| g + off)
            .with_context(|| format!("bloque de la línea {} sin '{BLOCK_END}'", g + 1))?;

        if end < g + 3 {
            bail!("bloque de la línea {} demasiado corto", g + 1);
        }
        lines[end - 3] = start_line.clone();
        lines[end - 2] = end_line.clone();
    }

    Ok(lines.join("\n"))
}

/// Reescribe el archivo completo en su lugar. No deja copia intermedia: si
/// falla a mitad de escritura, la única salida es restaurar desde el backup.
pub fn rewrite_in_place<F>(path: &Path, patch: F) -> Result<()>
where
    F: FnOnce(&str) -> Result<String>,
{
    let text = fs::read_to_string(path).with_context(|| format!("no se pudo leer {}", path.display()))?;
    let patched = patch(&text).with_context(|| format!("parcheando {}", path.display()))?;
    fs::write(path, patched).with_context(|| format!("no se pudo escribir {}", path.display()))?;
    Ok(())
}
