use anyhow::{bail, Context, Result};
use common::Settings;
use std::{fs, path::Path};
use tracing::{debug, info};

use crate::process::{CommandSpec, ProcessRunner};

/// Borra el árbol de salida del modelo y lo vuelve a extraer del archivo de
/// backup. Tolera que el árbol ya no exista.
pub async fn restore(settings: &Settings, runner: &dyn ProcessRunner) -> Result<()> {
    let live = &settings.model_out_dir_file;
    if live.exists() {
        fs::remove_dir_all(live).with_context(|| format!("no se pudo borrar {}", live.display()))?;
    }
    fs::create_dir_all(&settings.model_out_dir)?;

    let archive = settings.backup_folder.join(&settings.backup_archive);
    let cmd = CommandSpec::from_template(&settings.unpack_command)?
        .path_arg(&archive)
        .arg("-d")
        .path_arg(&settings.model_out_dir);

    let code = runner.run(&cmd).await?;
    if code != 0 {
        bail!("'{}' terminó con código {}", cmd, code);
    }
    debug!("{} restaurado desde {}", live.display(), archive.display());
    Ok(())
}

/// Vacía el directorio de contenedores observados. Devuelve cuántas entradas borró.
pub fn clear_observations(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        removed += 1;
    }
    Ok(removed)
}

/// Recuperación completa tras cada job, haya salido bien o mal. Las
/// observaciones se borran aunque el backup no se haya podido restaurar.
pub async fn recover(settings: &Settings, runner: &dyn ProcessRunner) -> Result<()> {
    let restored = restore(settings, runner).await;
    let cleared = clear_observations(&settings.obs_dss_dir);

    match (restored, cleared) {
        (Ok(()), Ok(removed)) => {
            info!("directorio de trabajo restaurado ({} observaciones borradas)", removed);
            Ok(())
        }
        (Err(e), Ok(removed)) => {
            Err(e.context(format!("backup sin restaurar ({} observaciones borradas igual)", removed)))
        }
        (Ok(()), Err(e)) => Err(e.context(format!("no se pudo vaciar {}", settings.obs_dss_dir.display()))),
        (Err(e), Err(clear_err)) => Err(e.context(format!(
            "tampoco se pudo vaciar {}: {clear_err:#}",
            settings.obs_dss_dir.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{settings_in, temp_dir, RecordingRunner};
    use std::{collections::BTreeMap, path::PathBuf};

    /// "unzip" que deja siempre el mismo árbol de backup.
    fn backup_runner(out_dir: PathBuf) -> RecordingRunner {
        RecordingRunner::new(move |_| {
            let nodes = out_dir.join("nodes_data");
            fs::create_dir_all(nodes.join("Polavaram"))?;
            fs::write(nodes.join("Polavaram").join("realtime_inflows_input"), "base")?;
            Ok(0)
        })
    }

    /// Contenido de todos los archivos bajo `dir`.
    fn snapshot(dir: &Path) -> BTreeMap<PathBuf, String> {
        let mut out = BTreeMap::new();
        if !dir.exists() {
            return out;
        }
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                out.extend(snapshot(&path));
            } else {
                out.insert(path.clone(), fs::read_to_string(&path).unwrap());
            }
        }
        out
    }

    #[tokio::test]
    async fn recover_deja_el_estado_del_backup() {
        let root = temp_dir("recovery_restore");
        let s = settings_in(&root);
        let runner = backup_runner(s.model_out_dir.clone());

        // restos del job anterior
        fs::create_dir_all(s.model_out_dir_file.join("Perur")).unwrap();
        fs::write(s.model_out_dir_file.join("Perur").join("sucio"), "x").unwrap();
        fs::create_dir_all(&s.obs_dss_dir).unwrap();
        fs::write(s.obs_dss_dir.join("PLV.dss"), "{}").unwrap();

        recover(&s, &runner).await.unwrap();

        assert!(!s.model_out_dir_file.join("Perur").exists());
        assert!(s.model_out_dir_file.join("Polavaram").join("realtime_inflows_input").is_file());
        assert_eq!(fs::read_dir(&s.obs_dss_dir).unwrap().count(), 0);

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "unzip");
        assert!(calls[0].args.contains(&s.backup_folder.join("nodes_data.zip").to_string_lossy().into_owned()));
    }

    #[tokio::test]
    async fn recover_es_idempotente() {
        let root = temp_dir("recovery_idempotent");
        let s = settings_in(&root);
        let runner = backup_runner(s.model_out_dir.clone());
        fs::create_dir_all(&s.obs_dss_dir).unwrap();
        fs::write(s.obs_dss_dir.join("PLV.dss"), "{}").unwrap();

        recover(&s, &runner).await.unwrap();
        let once = (snapshot(&s.model_out_dir), snapshot(&s.obs_dss_dir));

        recover(&s, &runner).await.unwrap();
        let twice = (snapshot(&s.model_out_dir), snapshot(&s.obs_dss_dir));

        assert_eq!(once, twice);
        assert!(!once.0.is_empty());
    }

    #[tokio::test]
    async fn backup_que_no_se_extrae_es_error() {
        let root = temp_dir("recovery_unzip_fail");
        let s = settings_in(&root);
        let runner = RecordingRunner::new(|_| Ok(9));

        assert!(restore(&s, &runner).await.is_err());
    }

    #[tokio::test]
    async fn backup_fallido_igual_borra_las_observaciones() {
        let root = temp_dir("recovery_restore_fail_clears");
        let s = settings_in(&root);
        let runner = RecordingRunner::new(|_| Ok(9));
        fs::create_dir_all(&s.obs_dss_dir).unwrap();
        fs::write(s.obs_dss_dir.join("PLV.dss"), "{}").unwrap();

        let err = recover(&s, &runner).await.unwrap_err();

        assert!(format!("{err:#}").contains("código 9"));
        assert!(!s.obs_dss_dir.join("PLV.dss").exists());
        assert_eq!(fs::read_dir(&s.obs_dss_dir).unwrap().count(), 0);
    }

    #[test]
    fn clear_observations_tolera_directorio_inexistente() {
        let root = temp_dir("recovery_clear");
        assert_eq!(clear_observations(&root.join("no_existe")).unwrap(), 0);

        fs::write(root.join("a.dss"), "").unwrap();
        fs::create_dir_all(root.join("sub")).unwrap();
        assert_eq!(clear_observations(&root).unwrap(), 2);
        assert_eq!(clear_observations(&root).unwrap(), 0);
    }
}
