use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::announce::{Announcement, Announcer};
use super::queue::PipelineQueues;
use super::track::{MediaFiles, PartialDownload, ResolvedTrack, TrackRequest};
use crate::config::Config;
use crate::sources::{FetchError, MediaFetcher, ResolveError, SourceResolver};
use crate::storage::MediaStorage;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

#[derive(Debug, Clone, Copy)]
pub struct DownloadConfig {
    pub concurrency: usize,
}

impl From<&Config> for DownloadConfig {
    fn from(config: &Config) -> Self {
        Self {
            concurrency: config.download_concurrency.max(1),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self { concurrency: 2 }
    }
}

/// Resultado de vaciar la cola de descargas una vez.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchReport {
    fn record(&mut self, job: Result<bool, tokio::task::JoinError>) {
        match job {
            Ok(true) => self.succeeded += 1,
            Ok(false) => self.failed += 1,
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                error!("💥 Tarea de descarga terminó con pánico: {:?}", e);
                self.failed += 1;
            }
        }
    }
}

/// Convierte pedidos en canciones descargadas y las entrega a la cola de
/// reproducción.
pub struct DownloadWorker {
    resolver: Arc<dyn SourceResolver>,
    fetcher: Arc<dyn MediaFetcher>,
    storage: MediaStorage,
    announcer: Arc<dyn Announcer>,
    config: DownloadConfig,
}

impl DownloadWorker {
    pub fn new(
        resolver: Arc<dyn SourceResolver>,
        fetcher: Arc<dyn MediaFetcher>,
        storage: MediaStorage,
        announcer: Arc<dyn Announcer>,
        config: DownloadConfig,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            storage,
            announcer,
            config,
        }
    }

    pub fn resolver(&self) -> &Arc<dyn SourceResolver> {
        &self.resolver
    }

    /// Resuelve y descarga un pedido. La portada es best-effort.
    pub async fn download(&self, request: &TrackRequest) -> Result<ResolvedTrack, DownloadError> {
        let source = self.resolver.resolve(request).await?;

        // La guarda borra el archivo si la descarga falla o si la tarea se
        // aborta (stop/replace) antes de terminar.
        let destination = self
            .storage
            .reserve_song_path(&source.title)
            .await
            .map_err(FetchError::from)?;
        let partial = PartialDownload::new(destination);
        let fetched = self.fetcher.fetch(&source, partial.path()).await?;
        let song = if fetched == partial.path() {
            partial
        } else {
            // El fetcher eligió otra ruta; la reserva vacía sobra
            drop(partial);
            PartialDownload::new(fetched)
        };

        let cover_url = request
            .cover_url()
            .map(str::to_string)
            .or_else(|| source.cover_url.clone());

        let cover = match cover_url {
            Some(url) => {
                let partial = PartialDownload::new(self.storage.cover_path());
                match self.fetcher.fetch_cover(&url, partial.path()).await {
                    Ok(_) => Some(partial.keep()),
                    Err(e) => {
                        debug!("🖼️ Sin portada para '{}': {}", source.title, e);
                        None
                    }
                }
            }
            None => None,
        };

        Ok(ResolvedTrack::new(
            request.clone(),
            source,
            MediaFiles::new(song.keep(), cover),
        ))
    }

    /// Procesa un pedido completo: éxito → cola de reproducción, error →
    /// cola de errores y aviso al usuario.
    pub async fn process(&self, request: TrackRequest, queues: &PipelineQueues) -> bool {
        let ok = match self.download(&request).await {
            Ok(track) => {
                info!("✅ Descargado: {}", track.source().title);
                queues.ready.put(track);
                true
            }
            Err(e) => {
                warn!("❌ No se pudo descargar '{}': {}", request.label(), e);
                self.announcer
                    .announce(Announcement::ResolutionFailed {
                        query: request.label().to_string(),
                    })
                    .await;
                queues.failed.put(request);
                false
            }
        };

        queues.wake.notify_one();
        ok
    }

    /// Vacía la cola de descargas con a lo sumo `concurrency` trabajos en
    /// paralelo. Termina cuando todos los trabajos iniciados terminaron.
    /// Al cancelar `cancel` aborta los trabajos en curso y espera a que se
    /// suelten, de modo que sus archivos parciales ya no existen al retornar.
    pub async fn drain_batch(
        self: Arc<Self>,
        queues: PipelineQueues,
        cancel: CancellationToken,
    ) -> BatchReport {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut jobs = JoinSet::new();
        let mut report = BatchReport::default();

        loop {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let Ok(request) = queues.downloads.get_one() else {
                break;
            };

            debug!("⬇️ Iniciando descarga: {}", request.label());
            let worker = self.clone();
            let job_queues = queues.clone();
            jobs.spawn(async move {
                let _permit = permit;
                worker.process(request, &job_queues).await
            });

            while let Some(job) = jobs.try_join_next() {
                report.record(job);
            }
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("🛑 Cancelando {} descargas en curso", jobs.len());
                    jobs.shutdown().await;
                    break;
                }
                job = jobs.join_next() => match job {
                    Some(job) => report.record(job),
                    None => break,
                },
            }
        }

        debug!(
            "📦 Batch de descargas terminado: {} ok, {} con error",
            report.succeeded, report.failed
        );
        report
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::sources::ResolvedSource;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Fetcher que escribe parte del archivo y después se cuelga, como un
    /// yt-dlp a mitad de descarga. `delay` retrasa la escritura.
    #[derive(Debug, Default)]
    pub struct StallingFetcher {
        pub delay: Duration,
        pub hang: bool,
        pub written: Notify,
    }

    impl StallingFetcher {
        pub fn hanging() -> Self {
            Self {
                hang: true,
                ..Self::default()
            }
        }

        pub fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl MediaFetcher for StallingFetcher {
        async fn fetch(
            &self,
            source: &ResolvedSource,
            destination: &Path,
        ) -> Result<PathBuf, FetchError> {
            tokio::time::sleep(self.delay).await;
            tokio::fs::write(destination, source.id.as_bytes()).await?;
            self.written.notify_one();

            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(destination.to_path_buf())
        }

        async fn fetch_cover(&self, _url: &str, _destination: &Path) -> Result<PathBuf, FetchError> {
            Err(FetchError::Tool("sin red".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::StallingFetcher;
    use super::*;
    use crate::audio::announce::testing::RecordingAnnouncer;
    use crate::sources::{MockMediaFetcher, MockSourceResolver, ResolvedSource};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn source(title: &str) -> ResolvedSource {
        ResolvedSource {
            id: format!("id-{}", title),
            title: title.to_string(),
            artist: None,
            duration: Some(Duration::from_secs(180)),
            cover_url: Some("https://img.example/cover.jpg".to_string()),
            page_url: format!("https://www.youtube.com/watch?v={}", title),
        }
    }

    fn writing_fetcher() -> MockMediaFetcher {
        let mut fetcher = MockMediaFetcher::new();
        fetcher.expect_fetch().returning(|_, destination| {
            std::fs::write(destination, b"audio").unwrap();
            Ok(destination.to_path_buf())
        });
        fetcher
            .expect_fetch_cover()
            .returning(|_, _| Err(FetchError::Tool("sin red".into())));
        fetcher
    }

    async fn storage(dir: &Path) -> MediaStorage {
        MediaStorage::new(dir.join("song"), dir.join("cover"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn successful_download_reaches_ready_queue() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = MockSourceResolver::new();
        resolver
            .expect_resolve()
            .returning(|_| Ok(source("Hello World")));
        let announcer = Arc::new(RecordingAnnouncer::default());

        let worker = DownloadWorker::new(
            Arc::new(resolver),
            Arc::new(writing_fetcher()),
            storage(dir.path()).await,
            announcer.clone(),
            DownloadConfig::default(),
        );
        let queues = PipelineQueues::new();

        assert!(worker.process(TrackRequest::search("hello"), &queues).await);

        let track = queues.ready.get_one().unwrap();
        assert!(track.media_path().exists());
        assert_eq!(track.cover_path(), None);
        assert!(queues.failed.is_empty());
        assert!(announcer.messages().is_empty());
    }

    #[tokio::test]
    async fn resolution_failure_goes_to_error_queue() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = MockSourceResolver::new();
        resolver
            .expect_resolve()
            .returning(|_| Err(ResolveError::NotFound("q1".into())));
        let mut fetcher = MockMediaFetcher::new();
        fetcher.expect_fetch().never();
        let announcer = Arc::new(RecordingAnnouncer::default());

        let worker = DownloadWorker::new(
            Arc::new(resolver),
            Arc::new(fetcher),
            storage(dir.path()).await,
            announcer.clone(),
            DownloadConfig::default(),
        );
        let queues = PipelineQueues::new();

        assert!(!worker.process(TrackRequest::search("q1"), &queues).await);

        assert!(queues.ready.is_empty());
        assert_eq!(
            queues.failed.peek_map(|r| r.label().to_string()),
            Ok(vec!["q1".to_string()])
        );
        assert_eq!(
            announcer.messages(),
            vec![Announcement::ResolutionFailed {
                query: "q1".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn failed_fetch_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = MockSourceResolver::new();
        resolver.expect_resolve().returning(|_| Ok(source("Partial")));
        let mut fetcher = MockMediaFetcher::new();
        fetcher.expect_fetch().returning(|_, destination| {
            std::fs::write(destination, b"half").unwrap();
            Err(FetchError::Tool("conexión cortada".into()))
        });

        let storage = storage(dir.path()).await;
        let worker = DownloadWorker::new(
            Arc::new(resolver),
            Arc::new(fetcher),
            storage.clone(),
            Arc::new(RecordingAnnouncer::default()),
            DownloadConfig::default(),
        );

        let result = worker.download(&TrackRequest::search("partial")).await;
        assert!(matches!(result, Err(DownloadError::Fetch(_))));
        assert_eq!(std::fs::read_dir(storage.song_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn same_title_downloads_in_flight_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = MockSourceResolver::new();
        resolver
            .expect_resolve()
            .returning(|_| Ok(source("Same Title")));

        let worker = DownloadWorker::new(
            Arc::new(resolver),
            Arc::new(StallingFetcher::slow(Duration::from_millis(30))),
            storage(dir.path()).await,
            Arc::new(RecordingAnnouncer::default()),
            DownloadConfig::default(),
        );

        let first_request = TrackRequest::search("same title");
        let second_request = TrackRequest::search("same title again");
        let (first, second) = tokio::join!(
            worker.download(&first_request),
            worker.download(&second_request)
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_ne!(first.media_path(), second.media_path());
        assert!(first.media_path().exists());
        assert!(second.media_path().exists());
    }

    #[tokio::test]
    async fn aborted_download_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = MockSourceResolver::new();
        resolver.expect_resolve().returning(|_| Ok(source("Stuck")));
        let fetcher = Arc::new(StallingFetcher::hanging());

        let storage = storage(dir.path()).await;
        let worker = Arc::new(DownloadWorker::new(
            Arc::new(resolver),
            fetcher.clone(),
            storage.clone(),
            Arc::new(RecordingAnnouncer::default()),
            DownloadConfig::default(),
        ));

        let job = tokio::spawn({
            let worker = worker.clone();
            async move { worker.download(&TrackRequest::search("stuck")).await.is_ok() }
        });
        fetcher.written.notified().await;
        assert_eq!(std::fs::read_dir(storage.song_dir()).unwrap().count(), 1);

        job.abort();
        assert!(job.await.unwrap_err().is_cancelled());
        assert_eq!(std::fs::read_dir(storage.song_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn cancelled_batch_waits_for_jobs_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = MockSourceResolver::new();
        resolver
            .expect_resolve()
            .returning(|request| Ok(source(request.label())));
        let fetcher = Arc::new(StallingFetcher::hanging());

        let storage = storage(dir.path()).await;
        let worker = Arc::new(DownloadWorker::new(
            Arc::new(resolver),
            fetcher.clone(),
            storage.clone(),
            Arc::new(RecordingAnnouncer::default()),
            DownloadConfig { concurrency: 1 },
        ));
        let queues = PipelineQueues::new();
        queues.downloads.put(TrackRequest::search("first"));
        queues.downloads.put(TrackRequest::search("second"));

        let cancel = CancellationToken::new();
        let batch = tokio::spawn(worker.drain_batch(queues.clone(), cancel.clone()));
        fetcher.written.notified().await;

        cancel.cancel();
        let report = batch.await.unwrap();

        assert_eq!(report, BatchReport::default());
        assert_eq!(std::fs::read_dir(storage.song_dir()).unwrap().count(), 0);
        assert!(queues.ready.is_empty());
        // El segundo nunca empezó; limpiarlo es tarea de quien canceló
        assert_eq!(queues.downloads.len(), 1);
    }

    /// Resolver lento que mide cuántas resoluciones corren a la vez.
    struct SlowResolver {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl SourceResolver for SlowResolver {
        async fn resolve(&self, request: &TrackRequest) -> Result<ResolvedSource, ResolveError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(source(request.label()))
        }

        async fn expand_playlist(
            &self,
            _url: &str,
            _limit: usize,
        ) -> Result<Vec<TrackRequest>, ResolveError> {
            Ok(Vec::new())
        }

        async fn search(
            &self,
            _query: &str,
            _limit: usize,
        ) -> Result<Vec<TrackRequest>, ResolveError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn batch_respects_concurrency_limit() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = Arc::new(SlowResolver {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });

        let worker = Arc::new(DownloadWorker::new(
            resolver.clone(),
            Arc::new(writing_fetcher()),
            storage(dir.path()).await,
            Arc::new(RecordingAnnouncer::default()),
            DownloadConfig { concurrency: 2 },
        ));

        let queues = PipelineQueues::new();
        for i in 0..6 {
            queues.downloads.put(TrackRequest::search(format!("song{}", i)));
        }

        let report = worker
            .drain_batch(queues.clone(), CancellationToken::new())
            .await;

        assert_eq!(report, BatchReport { succeeded: 6, failed: 0 });
        assert_eq!(queues.ready.len(), 6);
        assert!(queues.downloads.is_empty());
        assert!(resolver.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(resolver.peak.load(Ordering::SeqCst), 2);
    }
}
