use anyhow::{bail, Context, Result};
use std::{
    collections::HashMap,
    fs,
    path::Path,
};

/// Columnas de tiempo entre la estación y el caudal:
/// type,year,month,day,hour,minute,ex_year,ex_month,ex_day,ex_hour,ex_minute
const TIME_COLUMNS: usize = 11;
const COLUMNS: usize = TIME_COLUMNS + 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOp {
    Add,
    Remove,
    /// Serie base explícita para la estación
    Base,
}

impl MergeOp {
    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "add" => Ok(Self::Add),
            "remove" => Ok(Self::Remove),
            "base" => Ok(Self::Base),
            other => bail!("operación de merge desconocida {other:?}"),
        }
    }
}

/// Cómo se compone una estación a partir de las sub-cuencas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Composition {
    pub base: Option<String>,
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

/// Mapa add/remove por estación, en el orden en que aparecen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositionMap {
    /// Sub-cuenca de la primera fila: de ella sale el índice de tiempo
    pub template: String,
    pub stations: Vec<(String, Composition)>,
}

impl CompositionMap {
    /// Filas `estación,sub-cuenca,op` sin encabezado.
    pub fn from_rows<'a, I>(rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str, &'a str)>,
    {
        let mut template: Option<String> = None;
        let mut stations: Vec<(String, Composition)> = Vec::new();

        for (stn, sc, op) in rows {
            let op = MergeOp::parse(op)?;
            if template.is_none() {
                template = Some(sc.to_string());
            }

            let idx = match stations.iter().position(|(s, _)| s == stn) {
                Some(i) => i,
                None => {
                    stations.push((stn.to_string(), Composition::default()));
                    stations.len() - 1
                }
            };
            let comp = &mut stations[idx].1;
            match op {
                MergeOp::Add => comp.add.push(sc.to_string()),
                MergeOp::Remove => comp.remove.push(sc.to_string()),
                MergeOp::Base => comp.base = Some(sc.to_string()),
            }
        }

        let template = template.context("el mapa de composición está vacío")?;
        Ok(Self { template, stations })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .from_path(path)
            .with_context(|| format!("no se pudo abrir el mapa {}", path.display()))?;

        let mut rows: Vec<(String, String, String)> = Vec::new();
        for row in reader.records() {
            let row = row?;
            if row.len() < 3 {
                bail!("{}: fila {:?} con menos de 3 columnas", path.display(), row);
            }
            rows.push((row[0].to_string(), row[1].to_string(), row[2].to_string()));
        }

        Self::from_rows(rows.iter().map(|(a, b, c)| (a.as_str(), b.as_str(), c.as_str())))
    }
}

/// Fila de la salida de sub-cuencas del motor.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRow {
    pub station: String,
    pub time: Vec<String>,
    pub flow: f64,
}

pub fn read_series_rows(path: &Path) -> Result<Vec<SeriesRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("no se pudo abrir {}", path.display()))?;

    let mut out = Vec::new();
    for (idx, row) in reader.records().enumerate() {
        let row = row?;
        if row.len() != COLUMNS {
            bail!(
                "{} línea {}: {} columnas, se esperaban {}",
                path.display(),
                idx + 1,
                row.len(),
                COLUMNS
            );
        }
        let flow: f64 = row[COLUMNS - 1]
            .parse()
            .with_context(|| format!("{} línea {}: caudal inválido", path.display(), idx + 1))?;
        out.push(SeriesRow {
            station: row[0].to_string(),
            time: row.iter().skip(1).take(TIME_COLUMNS).map(str::to_string).collect(),
            flow,
        });
    }
    Ok(out)
}

fn lookup_series<'a>(series: &'a HashMap<&str, Vec<f64>>, name: &str, len: usize) -> Result<&'a Vec<f64>> {
    let s = series
        .get(name)
        .with_context(|| format!("la sub-cuenca {name:?} no está en la salida"))?;
    if s.len() != len {
        bail!("la serie {name:?} tiene {} valores, el índice tiene {len}", s.len());
    }
    Ok(s)
}

/// merged(estación) = base + Σ add − Σ remove, elemento a elemento sobre el
/// índice de tiempo de la sub-cuenca plantilla. La base es la sub-cuenca
/// marcada `base`, o la serie con el nombre de la estación, o ceros.
pub fn merge_series(rows: &[SeriesRow], map: &CompositionMap) -> Result<Vec<SeriesRow>> {
    let mut series: HashMap<&str, Vec<f64>> = HashMap::new();
    for r in rows {
        series.entry(r.station.as_str()).or_default().push(r.flow);
    }

    let index: Vec<&Vec<String>> = rows
        .iter()
        .filter(|r| r.station == map.template)
        .map(|r| &r.time)
        .collect();
    if index.is_empty() {
        bail!("la sub-cuenca plantilla {:?} no está en la salida", map.template);
    }
    let len = index.len();

    let mut out = Vec::with_capacity(map.stations.len() * len);
    for (stn, comp) in &map.stations {
        let mut merged = match (&comp.base, series.contains_key(stn.as_str())) {
            (Some(base), _) => lookup_series(&series, base, len)?.clone(),
            (None, true) => lookup_series(&series, stn, len)?.clone(),
            (None, false) => vec![0.0; len],
        };

        for sc in &comp.add {
            for (m, v) in merged.iter_mut().zip(lookup_series(&series, sc, len)?) {
                *m += v;
            }
        }
        for sc in &comp.remove {
            for (m, v) in merged.iter_mut().zip(lookup_series(&series, sc, len)?) {
                *m -= v;
            }
        }

        for (time, flow) in index.iter().zip(merged) {
            out.push(SeriesRow {
                station: stn.clone(),
                time: (*time).clone(),
                flow,
            });
        }
    }

    Ok(out)
}

pub fn write_series_rows(rows: &[SeriesRow], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
    for r in rows {
        let mut record: Vec<String> = Vec::with_capacity(COLUMNS);
        record.push(r.station.clone());
        record.extend(r.time.iter().cloned());
        record.push(r.flow.to_string());
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Lee la salida de sub-cuencas, compone y escribe el archivo mergeado.
/// Devuelve la cantidad de filas escritas.
pub fn merge_file(input: &Path, map_path: &Path, output: &Path) -> Result<usize> {
    let rows = read_series_rows(input)?;
    let map = CompositionMap::load(map_path)?;
    let merged = merge_series(&rows, &map)?;
    write_series_rows(&merged, output)?;
    Ok(merged.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, path::PathBuf};

    fn temp_dir(sub: &str) -> PathBuf {
        let base = env::temp_dir().join("merge_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    fn row(stn: &str, hour: u32, flow: f64) -> SeriesRow {
        let h = hour.to_string();
        let time = ["inflow", "2023", "03", "01", h.as_str(), "30", "2023", "03", "01", h.as_str(), "29"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        SeriesRow {
            station: stn.to_string(),
            time,
            flow,
        }
    }

    fn sample() -> Vec<SeriesRow> {
        vec![
            row("SC1", 8, 10.0),
            row("SC1", 9, 11.0),
            row("SC2", 8, 1.0),
            row("SC2", 9, 2.0),
            row("SC3", 8, 0.5),
            row("SC3", 9, 0.25),
            row("Polavaram", 8, 100.0),
            row("Polavaram", 9, 200.0),
        ]
    }

    fn flows(rows: &[SeriesRow], stn: &str) -> Vec<f64> {
        rows.iter().filter(|r| r.station == stn).map(|r| r.flow).collect()
    }

    #[test]
    fn merge_suma_add_y_resta_remove_sobre_la_base() {
        let map = CompositionMap::from_rows([
            ("Polavaram", "SC1", "add"),
            ("Polavaram", "SC3", "remove"),
        ])
        .unwrap();

        let out = merge_series(&sample(), &map).unwrap();
        // base = serie propia de Polavaram
        assert_eq!(flows(&out, "Polavaram"), vec![100.0 + 10.0 - 0.5, 200.0 + 11.0 - 0.25]);
    }

    #[test]
    fn estacion_sin_serie_propia_parte_de_cero() {
        let map = CompositionMap::from_rows([
            ("Dowlaiswaram", "SC1", "add"),
            ("Dowlaiswaram", "SC2", "add"),
            ("Dowlaiswaram", "SC3", "remove"),
        ])
        .unwrap();

        let out = merge_series(&sample(), &map).unwrap();
        assert_eq!(flows(&out, "Dowlaiswaram"), vec![10.5, 12.75]);
        // el índice de tiempo sale de la plantilla (SC1)
        assert_eq!(out[1].time[4], "9");
    }

    #[test]
    fn estacion_con_listas_vacias_queda_igual_a_la_base() {
        let map = CompositionMap::from_rows([("Polavaram", "SC2", "base")]).unwrap();
        let out = merge_series(&sample(), &map).unwrap();
        assert_eq!(flows(&out, "Polavaram"), flows(&sample(), "SC2"));
    }

    #[test]
    fn subcuenca_inexistente_o_de_otro_largo_es_error() {
        let map = CompositionMap::from_rows([("X", "SC1", "add"), ("X", "NOPE", "add")]).unwrap();
        assert!(merge_series(&sample(), &map).is_err());

        let mut rows = sample();
        rows.push(row("SC2", 10, 3.0));
        let map = CompositionMap::from_rows([("X", "SC1", "add"), ("X", "SC2", "add")]).unwrap();
        assert!(merge_series(&rows, &map).is_err());
    }

    #[test]
    fn composition_map_rechaza_operaciones_desconocidas_y_vacios() {
        assert!(CompositionMap::from_rows([("A", "B", "multiply")]).is_err());
        assert!(CompositionMap::from_rows(Vec::<(&str, &str, &str)>::new()).is_err());
    }

    #[test]
    fn merge_file_end_to_end() {
        let tmp = temp_dir("file");
        let input = tmp.join("sc_input");
        fs::write(
            &input,
            "SC1,inflow,2023,03,01,8,30,2023,03,01,9,29,10.0\n\
             SC2,inflow,2023,03,01,8,30,2023,03,01,9,29,4.5\n",
        )
        .unwrap();
        let map = tmp.join("sc_map.csv");
        fs::write(&map, "Perur,SC1,add\nPerur,SC2,remove\n").unwrap();
        let output = tmp.join("out").join("key");

        let n = merge_file(&input, &map, &output).unwrap();
        assert_eq!(n, 1);
        assert_eq!(
            fs::read_to_string(output).unwrap(),
            "Perur,inflow,2023,03,01,8,30,2023,03,01,9,29,5.5\n"
        );
    }
}
