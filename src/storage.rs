use anyhow::Result;
use rand::Rng;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

const SONG_EXTENSION: &str = "m4a";
const COVER_EXTENSION: &str = "jpg";
const COVER_NAME_LEN: usize = 15;
const RESERVE_ATTEMPTS: usize = 8;
const NAME_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Layout en disco de los archivos temporales (canciones y portadas).
#[derive(Debug, Clone)]
pub struct MediaStorage {
    song_dir: PathBuf,
    cover_dir: PathBuf,
}

impl MediaStorage {
    pub async fn new(song_dir: PathBuf, cover_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&song_dir).await?;
        fs::create_dir_all(&cover_dir).await?;

        info!(
            "📁 Storage inicializado: canciones en {}, portadas en {}",
            song_dir.display(),
            cover_dir.display()
        );

        Ok(Self { song_dir, cover_dir })
    }

    pub fn song_dir(&self) -> &Path {
        &self.song_dir
    }

    pub fn cover_dir(&self) -> &Path {
        &self.cover_dir
    }

    /// Reserva la ruta de la canción según su título creando el archivo
    /// vacío con `create_new`. Dos descargas con el mismo título nunca
    /// comparten archivo: si el nombre está tomado se prueba con un sufijo
    /// aleatorio.
    pub async fn reserve_song_path(&self, title: &str) -> std::io::Result<PathBuf> {
        let mut stem = sanitize_title(title);
        if stem.is_empty() {
            stem = random_name(COVER_NAME_LEN);
        }

        let mut path = self.song_dir.join(format!("{}.{}", stem, SONG_EXTENSION));
        for _ in 0..RESERVE_ATTEMPTS {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => return Ok(path),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    path = self
                        .song_dir
                        .join(format!("{}_{}.{}", stem, random_name(4), SONG_EXTENSION));
                }
                Err(e) => return Err(e),
            }
        }

        Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("sin nombre libre para '{}'", stem),
        ))
    }

    pub fn cover_path(&self) -> PathBuf {
        self.cover_dir
            .join(format!("{}.{}", random_name(COVER_NAME_LEN), COVER_EXTENSION))
    }

    /// Borra los archivos que hayan quedado de una ejecución anterior.
    pub async fn purge(&self) -> Result<usize> {
        let mut removed = 0;

        for dir in [&self.song_dir, &self.cover_dir] {
            let mut entries = fs::read_dir(dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_file() {
                    continue;
                }
                match fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("⚠️ No se pudo limpiar {}: {}", entry.path().display(), e),
                }
            }
        }

        if removed > 0 {
            info!("🧹 {} archivos huérfanos eliminados", removed);
        }
        Ok(removed)
    }
}

/// Normaliza un título para usarlo como nombre de archivo.
pub fn sanitize_title(title: &str) -> String {
    title
        .trim()
        .chars()
        .filter_map(|c| match c {
            '/' | '-' | ',' => Some('_'),
            ' ' | '\'' => None,
            c => Some(c),
        })
        .collect()
}

/// Nombre aleatorio de `len` caracteres en `[a-z0-9]`.
pub fn random_name(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| NAME_ALPHABET[rng.gen_range(0..NAME_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sanitize_replaces_separators_and_drops_spaces() {
        assert_eq!(sanitize_title("  AC/DC - Back In Black  "), "AC_DC_BackInBlack");
        assert_eq!(sanitize_title("Don't Stop, Me Now"), "DontStop_MeNow");
    }

    #[test]
    fn random_name_uses_lowercase_alphanumerics() {
        let name = random_name(15);
        assert_eq!(name.len(), 15);
        assert!(name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn reserved_song_paths_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MediaStorage::new(dir.path().join("song"), dir.path().join("cover"))
            .await
            .unwrap();

        let first = storage.reserve_song_path("Hello World").await.unwrap();
        assert_eq!(first, dir.path().join("song").join("HelloWorld.m4a"));
        assert!(first.exists());

        // El primero sigue vacío (descarga en curso) y aun así no se reutiliza
        let second = storage.reserve_song_path("Hello World").await.unwrap();
        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with(".m4a"));
        assert!(second.exists());
    }

    #[tokio::test]
    async fn concurrent_reservations_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MediaStorage::new(dir.path().join("song"), dir.path().join("cover"))
            .await
            .unwrap();

        let reservations = (0..8).map(|_| {
            let storage = storage.clone();
            tokio::spawn(async move { storage.reserve_song_path("Same Title").await.unwrap() })
        });
        let mut paths = futures::future::join_all(reservations)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect::<Vec<_>>();
        paths.sort();
        paths.dedup();

        assert_eq!(paths.len(), 8);
    }

    #[tokio::test]
    async fn empty_titles_get_random_names() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MediaStorage::new(dir.path().join("song"), dir.path().join("cover"))
            .await
            .unwrap();

        let path = storage.reserve_song_path(" ' ").await.unwrap();
        let file_name = path.file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(file_name.len(), COVER_NAME_LEN + 4);
    }

    #[tokio::test]
    async fn cover_path_is_random_jpg() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MediaStorage::new(dir.path().join("song"), dir.path().join("cover"))
            .await
            .unwrap();

        let cover = storage.cover_path();
        let file_name = cover.file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(file_name.len(), COVER_NAME_LEN + 4);
        assert!(file_name.ends_with(".jpg"));
    }

    #[tokio::test]
    async fn purge_removes_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MediaStorage::new(dir.path().join("song"), dir.path().join("cover"))
            .await
            .unwrap();

        std::fs::write(storage.song_dir().join("old.m4a"), b"x").unwrap();
        std::fs::write(storage.cover_dir().join("old.jpg"), b"x").unwrap();

        assert_eq!(storage.purge().await.unwrap(), 2);
        assert_eq!(storage.purge().await.unwrap(), 0);
    }
}
