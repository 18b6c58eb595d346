use chrono::{Datelike, NaiveDate};
use thiserror::Error;

/// Hora fija (IST) con la que arrancan las series observadas y los gauges.
pub const OBSERVATION_TIME: &str = "08:30";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("la clave {0:?} no tiene tres fechas separadas por '_'")]
    MissingDates(String),

    #[error("fecha inválida {0:?} (se esperaba YYYYMMDD)")]
    BadDate(String),

    #[error("ventana desordenada: start={start} reference={reference} end={end}")]
    OutOfOrder {
        start: NaiveDate,
        reference: NaiveDate,
        end: NaiveDate,
    },
}

/// Ventana de corrida: inicio, fecha de pronóstico y fin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunWindow {
    pub start: NaiveDate,
    pub reference: NaiveDate,
    pub end: NaiveDate,
}

impl RunWindow {
    pub fn new(start: NaiveDate, reference: NaiveDate, end: NaiveDate) -> Result<Self, WindowError> {
        if start > reference || reference > end {
            return Err(WindowError::OutOfOrder { start, reference, end });
        }
        Ok(Self { start, reference, end })
    }

    /// Parsea las tres primeras fechas de la clave de correlación,
    /// ej: "20230303_20230318_20230427_1679144521408".
    pub fn from_key(key: &str) -> Result<Self, WindowError> {
        let parts: Vec<&str> = key.split('_').collect();
        if parts.len() < 3 {
            return Err(WindowError::MissingDates(key.to_string()));
        }

        let start = parse_compact(parts[0])?;
        let reference = parse_compact(parts[1])?;
        let end = parse_compact(parts[2])?;
        Self::new(start, reference, end)
    }

    /// Todos los días de start a end, inclusive.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

fn parse_compact(raw: &str) -> Result<NaiveDate, WindowError> {
    if raw.len() != 8 {
        return Err(WindowError::BadDate(raw.to_string()));
    }
    NaiveDate::parse_from_str(raw, "%Y%m%d").map_err(|_| WindowError::BadDate(raw.to_string()))
}

/* =========================
   Formatos de fecha del motor
   ========================= */

/// "20230303"
pub fn compact(d: NaiveDate) -> String {
    d.format("%Y%m%d").to_string()
}

/// "3 March 2023" (día sin cero a la izquierda)
pub fn long_date(d: NaiveDate) -> String {
    format!("{} {} {}", d.day(), d.format("%B"), d.year())
}

/// "02MAR2023:1200"
pub fn grid_stamp(d: NaiveDate) -> String {
    format!("{}:1200", d.format("%d%b%Y").to_string().to_uppercase())
}

/// "3 March 2023, 08:30"
pub fn gauge_stamp(d: NaiveDate) -> String {
    format!("{}, {}", long_date(d), OBSERVATION_TIME)
}

/// "3March2023 08:30:00"
pub fn series_start(d: NaiveDate) -> String {
    format!("{}{}{} {}:00", d.day(), d.format("%B"), d.year(), OBSERVATION_TIME)
}
