use crate::backup::{BackupAdapter, BackupStore, HttpSheetsStore, NoopBackupStore};
use crate::cache::{CacheEngine, CacheStorage, HttpFetcher, NoopStorage, Request, SqliteStorage};
use crate::commands::{CacheCommand, Command};
use crate::config::Config;
use crate::db::Database;
use crate::outbox::{Outbox, RecordKind};
use crate::remote::{HttpRemoteStore, RemoteStore};
use crate::sync::{
  BackgroundScheduler, ConnectivityProbe, ConnectivitySignal, ReconcileOutcome, Reconciler,
  RemoteWriter, SyncHandle, SyncService, SyncTag,
};
use crate::writes::{WriteGateway, WriteOutcome};
use chrono::{Duration as ChronoDuration, Utc};
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

/// Cache engine as wired for the application: storage picked at runtime.
pub type Engine = CacheEngine<Box<dyn CacheStorage>, HttpFetcher>;

/// Everything one process needs, built once from configuration.
pub struct App {
  config: Config,
  network: HttpFetcher,
  engine: Engine,
  outbox: Arc<Outbox>,
  connectivity: ConnectivitySignal,
  scheduler: BackgroundScheduler,
  wakeups: Option<mpsc::UnboundedReceiver<SyncTag>>,
  reconciler: Reconciler,
  gateway: WriteGateway,
  force_offline: bool,
}

impl App {
  pub async fn new(config: Config, force_offline: bool) -> Result<Self> {
    let data_dir = Database::data_dir(config.data_dir.as_deref())?;
    debug!(data_dir = %data_dir.display(), "Using data directory");

    let outbox = Outbox::open(&data_dir.join("outbox.db"))
      .map_err(|e| eyre!("Failed to open outbox: {}", e))?;
    let outbox = Arc::new(outbox);

    let network = HttpFetcher::new()?;
    let storage: Box<dyn CacheStorage> = if config.cache.enabled {
      Box::new(SqliteStorage::open(&data_dir.join("cache.db"))?)
    } else {
      Box::new(NoopStorage)
    };
    let engine = CacheEngine::new(&config.cache_routing(), storage, network.clone())?;

    let remote: Arc<dyn RemoteStore> = Arc::new(
      HttpRemoteStore::new(&config.remote, engine.clone())?.with_token(Config::remote_token()),
    );
    let backup = BackupAdapter::new(Self::backup_store(&config, &network)?);
    let writer = RemoteWriter::new(remote, backup);

    let connectivity = ConnectivitySignal::new(false);
    let (scheduler, wakeups) = BackgroundScheduler::new();
    let reconciler = Reconciler::new(outbox.clone(), writer.clone());
    let gateway = WriteGateway::new(
      outbox.clone(),
      writer,
      connectivity.clone(),
      scheduler.clone(),
      config.points,
    );

    let app = Self {
      config,
      network,
      engine,
      outbox,
      connectivity,
      scheduler,
      wakeups: Some(wakeups),
      reconciler,
      gateway,
      force_offline,
    };

    if !force_offline {
      let online = app.probe()?.probe_once().await;
      info!(online, "Initial connectivity");
    }

    Ok(app)
  }

  /// Spreadsheet backup over the raw network. Row lists must never come
  /// from a stale cache, or upserts would append duplicates.
  fn backup_store(config: &Config, network: &HttpFetcher) -> Result<Arc<dyn BackupStore>> {
    let backup = &config.backup;
    if !backup.enabled {
      return Ok(Arc::new(NoopBackupStore));
    }
    match (&backup.base_url, &backup.spreadsheet_id) {
      (Some(base_url), Some(spreadsheet_id)) => Ok(Arc::new(HttpSheetsStore::new(
        base_url,
        spreadsheet_id,
        Config::backup_token()?,
        network.clone(),
      )?)),
      _ => {
        warn!("Backup enabled but base_url or spreadsheet_id is missing; backup disabled");
        Ok(Arc::new(NoopBackupStore))
      }
    }
  }

  fn probe(&self) -> Result<ConnectivityProbe<HttpFetcher>> {
    let target = self
      .config
      .sync
      .probe_url
      .as_deref()
      .unwrap_or(&self.config.remote.base_url);
    let url = Url::parse(target).map_err(|e| eyre!("Invalid probe URL '{}': {}", target, e))?;
    Ok(ConnectivityProbe::new(
      self.network.clone(),
      url,
      Duration::from_secs(self.config.sync.probe_interval_secs.max(1)),
      self.connectivity.clone(),
    ))
  }

  pub async fn run(&mut self, command: Command) -> Result<()> {
    match command {
      Command::Transaction {
        member,
        amount,
        member_type,
        notes,
        date,
      } => {
        let outcome = self
          .gateway
          .record_transaction(&member, member_type, amount, notes.as_deref(), date)
          .await?;
        report_write(&outcome);
      }
      Command::Redeem {
        member,
        points,
        item,
        date,
      } => {
        let outcome = self.gateway.redeem(&member, points, &item, date).await?;
        report_write(&outcome);
      }
      Command::Pending { kind } => self.list_pending(&Command::kinds(kind))?,
      Command::Sync { kind } => self.sync_now(&Command::kinds(kind)).await?,
      Command::Prune { older_than_days } => {
        let cutoff = Utc::now() - ChronoDuration::days(older_than_days.max(0));
        let removed = self
          .outbox
          .prune_synced(cutoff)
          .map_err(|e| eyre!("Failed to prune outbox: {}", e))?;
        println!("Removed {} synced records", removed);
      }
      Command::Cache { action } => self.cache(action).await?,
      Command::Serve => self.serve().await?,
    }
    Ok(())
  }

  fn list_pending(&self, kinds: &[RecordKind]) -> Result<()> {
    let mut total = 0;
    for kind in kinds {
      let records = self
        .outbox
        .list_pending(*kind)
        .map_err(|e| eyre!("Failed to list pending {}s: {}", kind, e))?;
      for record in &records {
        println!(
          "#{:<5} {:<12} {:<16} {:>+7}  {}  {}",
          record.local_id,
          record.kind,
          record.member_id,
          record.payload.points_delta,
          record.created_at_local.format("%Y-%m-%d %H:%M"),
          record.payload.notes
        );
      }
      total += records.len();
    }
    println!("{} pending", total);
    Ok(())
  }

  async fn sync_now(&self, kinds: &[RecordKind]) -> Result<()> {
    if !self.connectivity.is_online() {
      let pending = self
        .outbox
        .pending_count(None)
        .map_err(|e| eyre!("Failed to count pending records: {}", e))?;
      println!("Offline: {} pending items will sync when connectivity returns", pending);
      return Ok(());
    }

    match self.reconciler.run(kinds).await {
      Ok(ReconcileOutcome::Completed(report)) => {
        for summary in &report.summaries {
          println!("{}", summary);
        }
        println!("Synced {} items", report.synced());
      }
      Ok(ReconcileOutcome::Coalesced) => println!("A sync is already running"),
      Ok(ReconcileOutcome::Busy) => {
        println!("Another process is syncing; pending items stay queued")
      }
      Err(e) => return Err(eyre!("Sync failed: {}", e)),
    }
    Ok(())
  }

  async fn cache(&self, action: CacheCommand) -> Result<()> {
    match action {
      CacheCommand::Install => {
        let count = self.engine.install().await?;
        println!("Pre-cached {} assets for {}", count, self.engine.version());
      }
      CacheCommand::Activate => {
        let removed = self.engine.activate()?;
        for name in &removed {
          println!("Deleted {}", name);
        }
        println!("{} namespaces removed", removed.len());
      }
      CacheCommand::Fetch { url, navigate } => {
        let url = Url::parse(&url).map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;
        let request = if navigate {
          Request::navigate(url)
        } else {
          Request::get(url)
        };
        let result = self.engine.handle(&request).await?;
        println!(
          "{} from {:?} ({}), {} bytes",
          result.response.status,
          result.source,
          result
            .class
            .map(|c| c.to_string())
            .unwrap_or_else(|| "unrouted".to_string()),
          result.response.body.len()
        );
      }
      CacheCommand::Status => {
        let current = self.engine.current_namespaces();
        for namespace in self.engine.storage().namespaces()? {
          let marker = if current.contains(&namespace.name) { "*" } else { " " };
          println!("{} {} ({})", marker, namespace.name, namespace.resource_class);
        }
      }
    }
    Ok(())
  }

  /// Keep syncing until ctrl-c.
  async fn serve(&mut self) -> Result<()> {
    let wakeups = self
      .wakeups
      .take()
      .ok_or_else(|| eyre!("Sync service already started"))?;

    match self.engine.install().await {
      Ok(count) => info!(count, "Cache installed"),
      Err(e) => warn!(error = %e, "Cache install failed; offline page unavailable"),
    }
    if self.engine.is_ready() {
      self.engine.activate()?;
    }

    let probe_task = if self.force_offline {
      None
    } else {
      Some(self.probe()?.spawn())
    };

    let service = SyncService::new(
      self.reconciler.clone(),
      self.outbox.clone(),
      self.connectivity.clone(),
      self.scheduler.clone(),
      wakeups,
      Duration::from_secs(self.config.sync.poll_interval_secs.max(1)),
    );
    let handle = service.handle();
    let service_task = tokio::spawn(service.run());

    wait_for_shutdown(&handle).await?;
    info!("Shutting down");
    handle.shutdown();

    let result = service_task.await;
    if let Some(probe_task) = probe_task {
      probe_task.abort();
    }
    result.map_err(|e| eyre!("Sync service panicked: {}", e))?
  }
}

/// Wait for ctrl-c. SIGHUP asks the running service to sync now.
#[cfg(unix)]
async fn wait_for_shutdown(handle: &SyncHandle) -> Result<()> {
  use tokio::signal::unix::{signal, SignalKind};

  let mut hangup =
    signal(SignalKind::hangup()).map_err(|e| eyre!("Failed to listen for SIGHUP: {}", e))?;
  loop {
    tokio::select! {
      result = tokio::signal::ctrl_c() => {
        return result.map_err(|e| eyre!("Failed to listen for ctrl-c: {}", e));
      }
      _ = hangup.recv() => {
        info!("SIGHUP received, syncing now");
        handle.retrigger();
      }
    }
  }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_handle: &SyncHandle) -> Result<()> {
  tokio::signal::ctrl_c()
    .await
    .map_err(|e| eyre!("Failed to listen for ctrl-c: {}", e))
}

fn report_write(outcome: &WriteOutcome) {
  match outcome {
    WriteOutcome::Confirmed {
      remote_id,
      points_delta,
    } => println!("Confirmed {} ({:+} points)", remote_id, points_delta),
    WriteOutcome::Queued {
      local_id,
      points_delta,
    } => println!(
      "Queued #{} ({:+} points), will sync later",
      local_id, points_delta
    ),
  }
}
