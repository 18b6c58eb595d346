use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
};

use crate::window::{compact, RunWindow};

pub const MISSING_VALUE: f64 = -9999.0;

/// Serie grillada de lluvia diaria que importa el motor: rainfall[t][lat][lon] en mm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GriddedSeries {
    pub conventions: String,
    pub variable: String,
    pub units: String,
    pub missing_value: f64,
    /// Fechas "YYYY-MM-DD"
    pub time: Vec<String>,
    /// grados norte, ascendente
    pub lat: Vec<f64>,
    /// grados este, ascendente
    pub lon: Vec<f64>,
    pub rainfall: Vec<Vec<Vec<f64>>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Cell {
    lat: f64,
    lon: f64,
    rainfall: f64,
}

/// Lee un archivo diario con filas `lat,lon,rainfall` (sin encabezado).
fn read_daily_cells(path: &Path) -> Result<Vec<Cell>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("no se pudo abrir la grilla diaria {}", path.display()))?;

    let mut out = Vec::new();
    for (idx, row) in reader.records().enumerate() {
        let row = row?;
        if row.len() < 3 {
            bail!("{} línea {}: se esperaban 3 columnas", path.display(), idx + 1);
        }
        let parse = |i: usize| -> Result<f64> {
            row[i]
                .parse::<f64>()
                .with_context(|| format!("{} línea {}: valor {:?}", path.display(), idx + 1, &row[i]))
        };
        out.push(Cell {
            lat: parse(0)?,
            lon: parse(1)?,
            rainfall: parse(2)?,
        });
    }
    Ok(out)
}

fn sorted_axis(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut axis: Vec<f64> = values.collect();
    axis.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    axis.dedup();
    axis
}

fn axis_index(axis: &[f64], v: f64) -> Option<usize> {
    axis.iter().position(|x| *x == v)
}

/// Arma la serie grillada con un archivo por día de la ventana
/// (`<input_dir>/<YYYYMMDD>`). Los ejes salen del primer día; una celda que no
/// aparece en un día queda como `MISSING_VALUE`.
pub fn build_gridded_series(input_dir: &Path, window: &RunWindow) -> Result<GriddedSeries> {
    let first = read_daily_cells(&input_dir.join(compact(window.start)))?;
    if first.is_empty() {
        bail!("la grilla del día {} está vacía", compact(window.start));
    }

    let lat = sorted_axis(first.iter().map(|c| c.lat));
    let lon = sorted_axis(first.iter().map(|c| c.lon));

    let mut time = Vec::new();
    let mut rainfall = Vec::new();

    for day in window.days() {
        let cells = read_daily_cells(&input_dir.join(compact(day)))?;
        let mut plane = vec![vec![MISSING_VALUE; lon.len()]; lat.len()];

        for c in cells {
            let (i, j) = match (axis_index(&lat, c.lat), axis_index(&lon, c.lon)) {
                (Some(i), Some(j)) => (i, j),
                _ => bail!(
                    "celda ({}, {}) del día {} fuera de la grilla base",
                    c.lat,
                    c.lon,
                    compact(day)
                ),
            };
            plane[i][j] = c.rainfall;
        }

        time.push(day.format("%Y-%m-%d").to_string());
        rainfall.push(plane);
    }

    Ok(GriddedSeries {
        conventions: "CF-1.7".to_string(),
        variable: "rainfall".to_string(),
        units: "mm".to_string(),
        missing_value: MISSING_VALUE,
        time,
        lat,
        lon,
        rainfall,
    })
}

/// Escribe la serie grillada en `output_path`, creando la carpeta si hace falta.
pub fn write_gridded_series(series: &GriddedSeries, output_path: &Path) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut writer = BufWriter::new(File::create(output_path)?);
    serde_json::to_writer(&mut writer, series)?;
    writer.flush()?;
    Ok(())
}
