use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::window::series_start;

pub const INFLOWS_FILE: &str = "realtime_inflows_input";
pub const OUTFLOWS_FILE: &str = "realtime_outflows_input";

/// Valor "indefinido" del contenedor de series (f32::MIN como f64).
pub const UNDEFINED: f64 = -3.4028234663852886e38;

/// cfs -> m3/s
pub const CFS_TO_CMS: f64 = 0.028316847;

pub const OBSERVED_PATHNAME: &str = "/GODAVARI/OBSERVED/FLOW//1DAY/OBSERVED/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    Inflow,
    Outflow,
}

impl FlowKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Inflow" => Some(Self::Inflow),
            "Outflow" => Some(Self::Outflow),
            _ => None,
        }
    }
}

/// Resultado de separar el archivo observado por estación.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitSummary {
    pub stations: usize,
    pub rows_written: usize,
    /// Hubo al menos una lectura negativa en alguna estación.
    pub missing_data: bool,
}

/// Lista de estaciones: CSV con encabezado y columna `stn`.
pub fn read_station_list(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("no se pudo abrir la lista de estaciones {}", path.display()))?;

    let col = reader
        .headers()?
        .iter()
        .position(|h| h.trim_start_matches('\u{feff}') == "stn")
        .with_context(|| format!("{} no tiene columna 'stn'", path.display()))?;

    let mut out = Vec::new();
    for row in reader.records() {
        let row = row?;
        if let Some(stn) = row.get(col) {
            if !stn.is_empty() {
                out.push(stn.to_string());
            }
        }
    }
    Ok(out)
}

/// Separa el archivo combinado `Stations,Type,Year,Month,Day,Hour,Minute,Flow`
/// en `<model_inp>/<stn>/realtime_inflows_input` y `realtime_outflows_input`
/// (misma fila sin la columna Type). Sólo cuentan las estaciones listadas.
pub fn split_by_station(
    observed_file: &Path,
    stations: &[String],
    model_inp_dir: &Path,
) -> Result<SplitSummary> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(observed_file)
        .with_context(|| format!("no se pudo abrir {}", observed_file.display()))?;

    let mut rows: Vec<(String, FlowKind, Vec<String>, f64)> = Vec::new();
    for (idx, row) in reader.records().enumerate() {
        let row = row?;
        if row.len() < 8 {
            bail!("{} línea {}: se esperaban 8 columnas", observed_file.display(), idx + 1);
        }
        // filas de otro tipo se ignoran, como los encabezados sueltos
        let Some(kind) = FlowKind::parse(&row[1]) else {
            continue;
        };
        let flow: f64 = row[7].parse().with_context(|| {
            format!("{} línea {}: caudal {:?}", observed_file.display(), idx + 1, &row[7])
        })?;
        let without_type: Vec<String> = row
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 1)
            .map(|(_, v)| v.to_string())
            .collect();
        rows.push((row[0].to_string(), kind, without_type, flow));
    }

    let mut summary = SplitSummary::default();

    for stn in stations {
        let dir = model_inp_dir.join(stn);
        fs::create_dir_all(&dir)?;

        for (kind, file_name) in [(FlowKind::Inflow, INFLOWS_FILE), (FlowKind::Outflow, OUTFLOWS_FILE)] {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_path(dir.join(file_name))?;

            for (row_stn, row_kind, fields, flow) in &rows {
                if row_stn == stn && *row_kind == kind {
                    writer.write_record(fields)?;
                    summary.rows_written += 1;
                    if *flow < 0.0 {
                        summary.missing_data = true;
                    }
                }
            }
            writer.flush()?;
        }
        summary.stations += 1;
    }

    Ok(summary)
}

/* =========================
   Contenedor de series observadas
   ========================= */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesContainer {
    pub pathname: String,
    /// Intervalo en días
    pub interval: u32,
    pub start: String,
    pub units: String,
    pub data_type: String,
    pub values: Vec<f64>,
}

/// Convierte caudales en cfs a m3/s; una lectura negativa nunca pasa:
/// se reemplaza por `UNDEFINED`.
pub fn to_container_values(flows_cfs: &[f64]) -> Vec<f64> {
    flows_cfs
        .iter()
        .map(|v| if *v < 0.0 { UNDEFINED } else { v * CFS_TO_CMS })
        .collect()
}

pub fn observed_container(flows_cfs: &[f64], start: NaiveDate) -> TimeSeriesContainer {
    TimeSeriesContainer {
        pathname: OBSERVED_PATHNAME.to_string(),
        interval: 1,
        start: series_start(start),
        units: "M3/S".to_string(),
        data_type: "PER-AVER".to_string(),
        values: to_container_values(flows_cfs),
    }
}

/// Última columna de cada fila de un archivo por estación.
fn read_last_column(path: &Path) -> Result<Vec<f64>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("no se pudo abrir {}", path.display()))?;

    let mut out = Vec::new();
    for row in reader.records() {
        let row = row?;
        let Some(last) = row.iter().last() else {
            continue;
        };
        out.push(
            last.parse()
                .with_context(|| format!("{}: caudal {:?}", path.display(), last))?,
        );
    }
    Ok(out)
}

/// Recorre el catálogo de gauges observados (CSV con encabezado: col 0 carpeta
/// de estación, col 1 nombre del gauge, col 4 archivo) y escribe un contenedor
/// `<out_dir>/<gauge>.dss` por fila.
pub fn containerize_observed(
    catalog: &Path,
    model_inp_dir: &Path,
    start: NaiveDate,
    out_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(catalog)
        .with_context(|| format!("no se pudo abrir el catálogo {}", catalog.display()))?;

    fs::create_dir_all(out_dir)?;
    let mut written = Vec::new();

    for (idx, row) in reader.records().enumerate() {
        let row = row?;
        if row.len() < 5 {
            bail!("{} fila {}: se esperaban al menos 5 columnas", catalog.display(), idx + 1);
        }
        let flows = read_last_column(&model_inp_dir.join(&row[0]).join(&row[4]))?;
        let container = observed_container(&flows, start);

        let path = out_dir.join(format!("{}.dss", &row[1]));
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer(&mut writer, &container)?;
        writer.flush()?;
        written.push(path);
    }

    Ok(written)
}
