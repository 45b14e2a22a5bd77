use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use tracing_appender::non_blocking::WorkerGuard;

#[derive(Debug, Default)]
pub struct LoggingMetrics {
    pub flush_count: AtomicU64,
    pub shutdown_in_progress: AtomicBool,
}

/// Снимок [`LoggingMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggingStats {
    pub flush_count: u64,
    pub shutdown_in_progress: bool,
}

/// Держит конвейер логирования живым.
///
/// Хранит worker guard файлового аппендера; буферизованные строки
/// записываются при shutdown или drop хэндла.
pub struct LoggingHandle {
    file_guard: Option<WorkerGuard>,
    pub metrics: Arc<LoggingMetrics>,
}

impl LoggingHandle {
    pub fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self {
            file_guard,
            metrics: Arc::new(LoggingMetrics::default()),
        }
    }

    pub fn has_file_sink(&self) -> bool {
        self.file_guard.is_some()
    }

    pub fn flush(&self) {
        let count = self.metrics.flush_count.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(flush_count = count, "Logging flush requested");
    }

    /// Сбрасывает буферы и освобождает файловый sink.
    pub fn shutdown(mut self) {
        self.metrics
            .shutdown_in_progress
            .store(true, Ordering::Release);
        tracing::info!(
            total_flushes = self.metrics.flush_count.load(Ordering::Relaxed),
            "Logging shutdown"
        );
        drop(self.file_guard.take());
    }

    pub fn get_metrics(&self) -> LoggingStats {
        LoggingStats {
            flush_count: self.metrics.flush_count.load(Ordering::Relaxed),
            shutdown_in_progress: self.metrics.shutdown_in_progress.load(Ordering::Acquire),
        }
    }
}
