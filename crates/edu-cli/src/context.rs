//! Engine construction from command-line options.
//!
//! The file backend is load, mutate, save. Each command holds an exclusive
//! advisory lock on `<state>.lock` from before the load until the context
//! is dropped, so concurrent invocations run one after another instead of
//! overwriting each other's snapshot.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use fs4::fs_std::FileExt;

use edu_core::SettlementConfig;
use edu_settlement::{MemoryLedger, MemoryRecords, RecordSet, SettlementEngine};
use edu_store::{PgLedger, PgRecords};

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalOpts {
    /// Path to the settlement configuration (YAML).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Subscription and engagement records (JSON or YAML), file backend only.
    #[arg(long, global = true)]
    pub data: Option<PathBuf>,

    /// Ledger snapshot file, file backend only.
    #[arg(long, global = true, default_value = ".edu/ledger.json")]
    pub state: PathBuf,

    /// PostgreSQL connection string. Selects the database backend.
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    pub json: bool,
}

enum Backend {
    File {
        ledger: Arc<MemoryLedger>,
        path: PathBuf,
        _lock: StateLock,
    },
    Postgres,
}

/// Exclusive lock on the file backend's snapshot. Released when the
/// handle closes.
struct StateLock {
    _file: File,
}

impl StateLock {
    /// Block until no other process holds the lock for `state`.
    async fn acquire(state: &Path) -> Result<Self> {
        let path = lock_path(state);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("opening lock file {}", path.display()))?;

        tracing::debug!(path = %path.display(), "acquiring ledger lock");
        let file = tokio::task::spawn_blocking(move || {
            FileExt::lock_exclusive(&file).map(|()| file)
        })
        .await
        .context("ledger lock task failed")?
        .with_context(|| format!("locking {}", path.display()))?;
        tracing::debug!(path = %path.display(), "ledger lock held");
        Ok(Self { _file: file })
    }
}

/// `ledger.json` is guarded by `ledger.json.lock` next to it. The snapshot
/// itself is replaced by rename on save, so it cannot carry the lock.
fn lock_path(state: &Path) -> PathBuf {
    let mut name = state.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// A configured engine plus what is needed to persist its ledger.
///
/// With the file backend the context owns the ledger lock; drop it to let
/// the next command in.
pub struct CliContext {
    engine: SettlementEngine,
    backend: Backend,
    json: bool,
}

impl CliContext {
    /// Load configuration and open the selected backend.
    pub async fn open(opts: &GlobalOpts) -> Result<Self> {
        let config = SettlementConfig::load(opts.config.as_deref())
            .context("loading settlement configuration")?;
        tracing::debug!(?config, "configuration resolved");

        if let Some(url) = &opts.database_url {
            let pool = edu_store::connect(url)
                .await
                .context("connecting to PostgreSQL")?;
            let records = Arc::new(PgRecords::new(pool.clone()));
            let engine = SettlementEngine::new(
                records.clone(),
                records,
                Arc::new(PgLedger::new(pool)),
                config,
            );
            return Ok(Self {
                engine,
                backend: Backend::Postgres,
                json: opts.json,
            });
        }

        let records = match &opts.data {
            Some(path) => RecordSet::load(path)
                .with_context(|| format!("loading records from {}", path.display()))?,
            None => {
                tracing::warn!("no --data file and no database configured; using empty records");
                RecordSet::default()
            }
        };
        let lock = StateLock::acquire(&opts.state).await?;
        let ledger = Arc::new(
            MemoryLedger::load(&opts.state)
                .with_context(|| format!("loading ledger from {}", opts.state.display()))?,
        );
        let records = Arc::new(MemoryRecords::new(records));
        let engine = SettlementEngine::new(records.clone(), records, ledger.clone(), config);
        Ok(Self {
            engine,
            backend: Backend::File {
                ledger,
                path: opts.state.clone(),
                _lock: lock,
            },
            json: opts.json,
        })
    }

    /// The engine.
    pub fn engine(&self) -> &SettlementEngine {
        &self.engine
    }

    /// Whether output should be JSON.
    pub fn json(&self) -> bool {
        self.json
    }

    /// Save the file-backed ledger if this command changed it.
    ///
    /// The database backend commits inside the engine; nothing to do here.
    pub fn persist(&self) -> Result<()> {
        if let Backend::File { ledger, path, .. } = &self.backend {
            if ledger.write_count() == 0 {
                return Ok(());
            }
            ledger
                .save(path)
                .with_context(|| format!("saving ledger to {}", path.display()))?;
            tracing::debug!(path = %path.display(), writes = ledger.write_count(), "ledger saved");
        }
        Ok(())
    }
}
