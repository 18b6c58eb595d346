use anyhow::{Context, Result};
use std::path::Path;

use crate::job::RunType;

/// Registro de una sola fila que leen los scripts del motor:
/// `clave,nombre de pronóstico,nombre de lluvia`. Se sobreescribe en cada job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMetadata {
    pub key: String,
    pub compute_name: String,
    pub rainfall_name: String,
}

impl RunMetadata {
    pub fn new(key: &str, run_type: RunType) -> Self {
        Self {
            key: key.to_string(),
            compute_name: run_type.compute_name().to_string(),
            rainfall_name: run_type.rainfall_name().to_string(),
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)
            .with_context(|| format!("no se pudo crear {}", path.display()))?;
        writer.write_record([&self.key, &self.compute_name, &self.rainfall_name])?;
        writer.flush()?;
        Ok(())
    }

    #[cfg(test)]
    pub fn read(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .with_context(|| format!("no se pudo abrir {}", path.display()))?;

        let row = reader
            .records()
            .next()
            .with_context(|| format!("{} está vacío", path.display()))??;

        Ok(Self {
            key: row.get(0).unwrap_or("").to_string(),
            compute_name: row.get(1).unwrap_or("").to_string(),
            rainfall_name: row.get(2).unwrap_or("").to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    #[test]
    fn write_sobreescribe_y_deja_una_sola_fila() {
        let base = env::temp_dir().join("metadata_tests");
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        let path = base.join("metadata.csv");

        RunMetadata::new("k1", RunType::ImdForecast).write(&path).unwrap();
        let second = RunMetadata::new("k2", RunType::EnsembleDeterministic);
        second.write(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "k2,Forecast_ECMWF_DET,ECMWF_DET\n");
        assert_eq!(RunMetadata::read(&path).unwrap(), second);
    }
}
