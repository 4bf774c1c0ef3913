use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::file::load_file;
use super::{Group, NotifyFunc, QueryFunc, RuleError, SampleAppender};

const DEFAULT_RESEND_DELAY: Duration = Duration::from_secs(60);

/// Capabilities every rule group evaluates with
#[derive(Clone)]
pub struct ManagerOptions {
    pub query: Arc<dyn QueryFunc>,
    pub notify: Arc<dyn NotifyFunc>,
    pub appender: Arc<dyn SampleAppender>,

    /// Minimum time between two deliveries of an unchanged alert
    pub resend_delay: Duration,
}

impl ManagerOptions {
    pub fn new(
        query: Arc<dyn QueryFunc>,
        notify: Arc<dyn NotifyFunc>,
        appender: Arc<dyn SampleAppender>,
    ) -> Self {
        Self {
            query,
            notify,
            appender,
            resend_delay: DEFAULT_RESEND_DELAY,
        }
    }
}

/// Owns the installed rule groups and their evaluation loops
pub struct Manager {
    opts: ManagerOptions,
    groups: ArcSwap<Vec<Arc<Group>>>,

    /// Cancels the loops of the installed generation
    generation: Mutex<CancellationToken>,

    /// Group loops of every generation that may still be running
    loops: Mutex<JoinSet<()>>,

    /// Parent of every generation
    cancel: CancellationToken,
}

impl Manager {
    pub fn new(opts: ManagerOptions, cancel: CancellationToken) -> Self {
        let generation = cancel.child_token();
        Self {
            opts,
            groups: ArcSwap::from_pointee(Vec::new()),
            generation: Mutex::new(generation),
            loops: Mutex::new(JoinSet::new()),
            cancel,
        }
    }

    /// Currently installed groups
    pub fn groups(&self) -> Arc<Vec<Arc<Group>>> {
        self.groups.load_full()
    }

    /// Load `files` and replace the installed groups with their content.
    ///
    /// Nothing changes if any file fails to load. Must be called from within
    /// a tokio runtime, the group loops are spawned on it.
    pub fn update(&self, default_interval: Duration, files: &[PathBuf]) -> Result<(), RuleError> {
        let mut groups = Vec::new();
        for file in files {
            let rule_file = load_file(file)?;
            for config in rule_file.groups {
                groups.push(Arc::new(Group::from_config(file, config, default_interval)));
            }
        }

        let mut generation = self.generation.lock();

        let previous = self.groups.load_full();
        for group in &groups {
            if let Some(old) = previous
                .iter()
                .find(|old| old.file() == group.file() && old.name() == group.name())
            {
                group.copy_state(old);
            }
        }
        self.groups.store(Arc::new(groups.clone()));

        let next = self.cancel.child_token();
        std::mem::replace(&mut *generation, next.clone()).cancel();

        if self.cancel.is_cancelled() {
            warn!("rule manager is stopped, not starting {} groups", groups.len());
            return Ok(());
        }
        let mut loops = self.loops.lock();
        while loops.try_join_next().is_some() {}
        for group in groups {
            let name = group.name().to_string();
            let opts = self.opts.clone();
            let token = next.clone();
            loops.spawn(async move {
                if let Err(e) = group.run(opts, token).await {
                    warn!(group = %name, "group loop ended: {e:#}");
                }
            });
        }
        drop(loops);

        info!("installed {} rule groups from {} files", self.groups.load().len(), files.len());
        Ok(())
    }

    /// Stop every group loop.
    pub fn stop(&self) {
        self.generation.lock().cancel();
    }

    /// Wait until every group loop started so far has returned.
    pub async fn wait(&self) {
        let mut loops = std::mem::take(&mut *self.loops.lock());
        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                warn!("group loop failed: {e}");
            }
        }
        debug!("all group loops returned");
    }
}
