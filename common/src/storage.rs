use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use thiserror::Error;

use crate::{
    kv::{CodecError, KeyValue, KvCodec},
    resource::{Location, PartitionResult},
};

#[derive(Debug, Error)]
pub enum StorageError {
    /// El dato todavía no existe (o se perdió con su nodo).
    #[error("dato no disponible en {0}")]
    Unavailable(Location),

    #[error("error de E/S en {location}: {source}")]
    Io {
        location: Location,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl StorageError {
    fn io(path: &Path, source: io::Error) -> Self {
        StorageError::Io {
            location: Location::new(path.to_string_lossy()),
            source,
        }
    }
}

/* =========================
   Nombres de archivos
   ========================= */

/// Intermedio del map `map_id` para la partición `partition`.
pub fn intermediate_name(map_id: u32, partition: u32) -> String {
    format!("mr-{}-{}", map_id, partition)
}

/// Salida final de la partición `partition`.
pub fn output_name(partition: u32) -> String {
    format!("mr-out-{}.txt", partition)
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Escribe `data` en un temporal junto a `path` y lo renombra encima.
/// Dos ejecuciones del mismo map nunca mezclan su contenido.
fn write_atomically(path: &Path, data: &str) -> io::Result<()> {
    ensure_parent(path)?;
    let tmp = path.with_file_name(format!(
        ".{}.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("tmp"),
        uuid::Uuid::new_v4()
    ));
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        writer.write_all(data.as_bytes())?;
        writer.flush()?;
    }
    fs::rename(&tmp, path)
}

/* =========================
   Lectura de entradas
   ========================= */

/// Provee el contenido de una ubicación al paso de "claim".
pub trait ResourceProvider: Send + Sync {
    fn get_data(&self, location: &Location) -> Result<String, StorageError>;
}

/// Lee del sistema de archivos local (o compartido).
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalResourceProvider;

impl ResourceProvider for LocalResourceProvider {
    fn get_data(&self, location: &Location) -> Result<String, StorageError> {
        match fs::read_to_string(&location.file) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::Unavailable(location.clone()))
            }
            Err(e) => Err(StorageError::io(Path::new(&location.file), e)),
        }
    }
}

/* =========================
   Escritura de resultados
   ========================= */

/// Dónde dejan sus datos las tareas del worker.
pub trait ResultStorage: Send + Sync {
    /// Guarda el bucket de una partición (aunque esté vacío). Lo escrito
    /// queda en la ubicación devuelta.
    fn store_partition(
        &self,
        map_id: u32,
        partition: u32,
        pairs: &[KeyValue],
    ) -> Result<PartitionResult, StorageError>;

    /// Escribe la salida de un reduce en un archivo temporal único.
    /// Si falla no deja el temporal a medias.
    fn store_reduce_output(&self, partition: u32, lines: &[String])
        -> Result<Location, StorageError>;

    /// Borra datos de un intento abandonado. Ignora lo que ya no existe.
    fn discard(&self, location: &Location);
}

pub struct LocalResultStorage {
    dir: PathBuf,
    codec: Arc<dyn KvCodec>,
}

impl LocalResultStorage {
    pub fn new(dir: impl Into<PathBuf>, codec: Arc<dyn KvCodec>) -> Self {
        Self {
            dir: dir.into(),
            codec,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ResultStorage for LocalResultStorage {
    fn store_partition(
        &self,
        map_id: u32,
        partition: u32,
        pairs: &[KeyValue],
    ) -> Result<PartitionResult, StorageError> {
        let path = self.dir.join(intermediate_name(map_id, partition));
        let data = self.codec.serialize(pairs)?;
        write_atomically(&path, &data).map_err(|e| StorageError::io(&path, e))?;

        Ok(PartitionResult {
            partition,
            location: Location::new(path.to_string_lossy()),
        })
    }

    fn store_reduce_output(
        &self,
        partition: u32,
        lines: &[String],
    ) -> Result<Location, StorageError> {
        let path = self
            .dir
            .join(format!("mr-tmp-{}-{}", partition, uuid::Uuid::new_v4()));

        let write = || -> io::Result<()> {
            ensure_parent(&path)?;
            let mut writer = BufWriter::new(File::create(&path)?);
            for line in lines {
                writeln!(writer, "{}", line)?;
            }
            writer.flush()
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&path);
            return Err(StorageError::io(&path, e));
        }

        Ok(Location::new(path.to_string_lossy()))
    }

    fn discard(&self, location: &Location) {
        let _ = fs::remove_file(&location.file);
    }
}

/// Mueve la salida temporal de un reduce a `<output_dir>/mr-out-<p>.txt`.
/// Si el temporal ya es el nombre canónico no hace nada. Cuando el rename
/// falla (p.ej. otro sistema de archivos) copia y borra el temporal.
pub fn commit_reduce_output(
    temp: &Location,
    output_dir: &Path,
    partition: u32,
) -> io::Result<Location> {
    let target = output_dir.join(output_name(partition));
    let canonical = Location::new(target.to_string_lossy());
    if Path::new(&temp.file) == target.as_path() {
        return Ok(canonical);
    }

    ensure_parent(&target)?;
    let source = Path::new(&temp.file);
    if fs::rename(source, &target).is_err() {
        copy_into_place(source, &target)?;
    }
    Ok(canonical)
}

/// Copia `source` a un temporal junto a `target`, lo renombra encima y
/// borra `source`. El destino nunca queda a medio escribir.
fn copy_into_place(source: &Path, target: &Path) -> io::Result<()> {
    let staging = target.with_file_name(format!(
        ".{}.{}",
        target.file_name().and_then(|n| n.to_str()).unwrap_or("out"),
        uuid::Uuid::new_v4()
    ));
    if let Err(e) = fs::copy(source, &staging).and_then(|_| fs::rename(&staging, target)) {
        let _ = fs::remove_file(&staging);
        return Err(e);
    }
    fs::remove_file(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::JsonLinesCodec;
    use std::env;

    fn temp_dir(sub: &str) -> PathBuf {
        let base = env::temp_dir().join("storage_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    #[test]
    fn local_provider_marca_no_disponible_si_falta_el_archivo() {
        let tmp = temp_dir("provider_missing");
        let loc = Location::new(tmp.join("no_existe").to_string_lossy());

        match LocalResourceProvider.get_data(&loc) {
            Err(StorageError::Unavailable(l)) => assert_eq!(l, loc),
            other => panic!("se esperaba Unavailable, vino {:?}", other),
        }
    }

    #[test]
    fn store_partition_crea_el_archivo_incluso_vacio() {
        let tmp = temp_dir("map_output");
        let storage = LocalResultStorage::new(&tmp, Arc::new(JsonLinesCodec));

        let full = storage
            .store_partition(7, 0, &[KeyValue::new("new york", "1")])
            .unwrap();
        let empty = storage.store_partition(7, 1, &[]).unwrap();

        assert_eq!(full.partition, 0);
        assert_eq!(empty.partition, 1);
        assert!(full.location.file.ends_with(&intermediate_name(7, 0)));
        assert_eq!(
            fs::read_to_string(&full.location.file).unwrap(),
            "{\"key\":\"new york\",\"value\":\"1\"}\n"
        );
        assert_eq!(fs::read_to_string(&empty.location.file).unwrap(), "");

        // sin temporales colgando
        let leftovers = fs::read_dir(&tmp)
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn store_partition_repetido_sobrescribe_el_mismo_archivo() {
        let tmp = temp_dir("map_output_twice");
        let storage = LocalResultStorage::new(&tmp, Arc::new(JsonLinesCodec));

        let first = storage
            .store_partition(1, 0, &[KeyValue::new("x", "1"), KeyValue::new("y", "1")])
            .unwrap();
        let second = storage
            .store_partition(1, 0, &[KeyValue::new("x", "1")])
            .unwrap();

        assert_eq!(first, second);
        let back = JsonLinesCodec
            .deserialize(&fs::read_to_string(&second.location.file).unwrap())
            .unwrap();
        assert_eq!(back, vec![KeyValue::new("x", "1")]);
    }

    #[test]
    fn store_reduce_output_no_deja_temporal_si_falla() {
        let tmp = temp_dir("reduce_fail");
        // el "directorio" de trabajo es un archivo: la creación falla
        let blocker = tmp.join("work");
        fs::write(&blocker, "").unwrap();
        let storage = LocalResultStorage::new(&blocker, Arc::new(JsonLinesCodec));

        assert!(storage.store_reduce_output(0, &["a 1".to_string()]).is_err());
        let left: Vec<_> = fs::read_dir(&tmp).unwrap().flatten().collect();
        assert_eq!(left.len(), 1);
    }

    #[test]
    fn commit_reduce_output_renombra_al_nombre_canonico() {
        let tmp = temp_dir("commit");
        let storage = LocalResultStorage::new(tmp.join("work"), Arc::new(JsonLinesCodec));
        let out_dir = tmp.join("out");

        let temp = storage
            .store_reduce_output(2, &["a 2".to_string(), "b 1".to_string()])
            .unwrap();
        let committed = commit_reduce_output(&temp, &out_dir, 2).unwrap();

        assert!(committed.file.ends_with("mr-out-2.txt"));
        assert!(!Path::new(&temp.file).exists());
        assert_eq!(fs::read_to_string(&committed.file).unwrap(), "a 2\nb 1\n");

        // volver a "commitear" el canónico es un no-op
        let again = commit_reduce_output(&committed, &out_dir, 2).unwrap();
        assert_eq!(again, committed);
    }

    #[test]
    fn commit_reduce_output_falla_si_el_temporal_no_existe() {
        let tmp = temp_dir("commit_missing");
        let missing = Location::new(tmp.join("mr-tmp-0-x").to_string_lossy());

        assert!(commit_reduce_output(&missing, &tmp.join("out"), 0).is_err());
        assert!(!tmp.join("out").join(output_name(0)).exists());
    }

    #[test]
    fn copy_into_place_reemplaza_el_destino_y_borra_el_origen() {
        let tmp = temp_dir("copy_into_place");
        let source = tmp.join("mr-tmp-1-a");
        let target = tmp.join(output_name(1));
        fs::write(&source, "nuevo\n").unwrap();
        fs::write(&target, "viejo\n").unwrap();

        copy_into_place(&source, &target).unwrap();

        assert!(!source.exists());
        assert_eq!(fs::read_to_string(&target).unwrap(), "nuevo\n");
        let staging = fs::read_dir(&tmp)
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .count();
        assert_eq!(staging, 0);
    }

    #[test]
    fn discard_ignora_archivos_inexistentes() {
        let tmp = temp_dir("discard");
        let storage = LocalResultStorage::new(&tmp, Arc::new(JsonLinesCodec));
        storage.discard(&Location::new(tmp.join("nada").to_string_lossy()));
    }
}
