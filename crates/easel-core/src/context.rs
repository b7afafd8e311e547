//! Per-process context
//!
//! Each process (the main process or a window) owns one `ProcessContext`.
//! It wires the router and dispatcher to the shared window registry and
//! owns the package loader, the selection replica and the undo history,
//! each behind its own lock.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::AppConfig;
use crate::events::EventSink;
use crate::ipc::{Dispatcher, Endpoint, Envelope, Router, SessionRegistry, WindowRegistry};
use crate::packages::{ModuleHost, PackageBuilder, PackageLoader};
use crate::selection::{self, SelectionCoordinator};
use crate::undo::UndoCoordinator;

/// Services of one process
#[derive(Clone)]
pub struct ProcessContext {
    config: Arc<AppConfig>,
    router: Arc<Router>,
    dispatcher: Arc<Dispatcher>,
    packages: Arc<Mutex<PackageLoader>>,
    selection: Arc<Mutex<SelectionCoordinator>>,
    undo: Arc<Mutex<UndoCoordinator>>,
}

impl ProcessContext {
    pub async fn new(
        origin: Endpoint,
        registry: Arc<WindowRegistry>,
        config: AppConfig,
        host: Arc<dyn ModuleHost>,
        builder: Arc<dyn PackageBuilder>,
    ) -> Self {
        let router = Arc::new(Router::new(
            origin,
            registry,
            SessionRegistry::with_seed(config.ipc.session_seed),
            config.ipc.default_timeout(),
        ));
        let sink: Arc<dyn EventSink> = router.clone();
        let dispatcher = Arc::new(Dispatcher::new(router.clone()));

        let packages = PackageLoader::new(config.packages.clone(), host, builder, sink.clone());
        let selection = SelectionCoordinator::new(sink.clone());
        let undo = UndoCoordinator::new(sink, &config.undo);

        let context = Self {
            config: Arc::new(config),
            router,
            dispatcher,
            packages: Arc::new(Mutex::new(packages)),
            selection: Arc::new(Mutex::new(selection)),
            undo: Arc::new(Mutex::new(undo)),
        };
        context.install_selection_sync().await;
        info!("Process context ready for {}", origin);
        context
    }

    /// Apply other processes' selection changes to the local replica
    async fn install_selection_sync(&self) {
        for channel in selection::internal_channels() {
            let selection = self.selection.clone();
            self.dispatcher
                .on(&channel, move |incoming| {
                    let selection = selection.clone();
                    async move {
                        selection
                            .lock()
                            .await
                            .apply_remote(&incoming.channel, &incoming.args);
                    }
                })
                .await;
        }
    }

    /// Start draining this process's inbox
    pub fn spawn_inbox(&self, inbox: mpsc::UnboundedReceiver<Envelope>) -> JoinHandle<()> {
        self.dispatcher.clone().spawn(inbox)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn origin(&self) -> Endpoint {
        self.router.origin()
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<WindowRegistry> {
        self.router.registry()
    }

    pub fn packages(&self) -> &Arc<Mutex<PackageLoader>> {
        &self.packages
    }

    pub fn selection(&self) -> &Arc<Mutex<SelectionCoordinator>> {
        &self.selection
    }

    pub fn undo(&self) -> &Arc<Mutex<UndoCoordinator>> {
        &self.undo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::{ChannelPort, WindowId};
    use crate::packages::{PackageManifest, PackageModule};
    use crate::selection::SelectOptions;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::path::Path;

    struct NullHost;

    impl ModuleHost for NullHost {
        fn loaded_modules(&self) -> BTreeSet<String> {
            BTreeSet::new()
        }

        fn load_main(
            &self,
            _manifest: &PackageManifest,
            _entry: &Path,
        ) -> Result<Box<dyn PackageModule>, String> {
            Err("no modules in tests".to_string())
        }

        fn evict(&self, _modules: &BTreeSet<String>) {}
    }

    struct NullBuilder;

    #[async_trait]
    impl PackageBuilder for NullBuilder {
        async fn build(&self, _manifest: &PackageManifest, _dest: &Path) -> Result<(), String> {
            Ok(())
        }
    }

    async fn process(origin: Endpoint, registry: Arc<WindowRegistry>) -> ProcessContext {
        ProcessContext::new(
            origin,
            registry,
            AppConfig::default(),
            Arc::new(NullHost),
            Arc::new(NullBuilder),
        )
        .await
    }

    async fn drain(
        context: &ProcessContext,
        inbox: &mut mpsc::UnboundedReceiver<Envelope>,
    ) -> usize {
        let mut count = 0;
        while let Ok(envelope) = inbox.try_recv() {
            context.dispatcher().dispatch(envelope).await;
            count += 1;
        }
        count
    }

    #[tokio::test]
    async fn test_selection_replicates_to_other_process() {
        let (main_port, mut main_rx) = ChannelPort::pair("main");
        let (window_port, mut window_rx) = ChannelPort::pair("w1");
        let registry = Arc::new(WindowRegistry::new(main_port));
        registry.add_window(WindowId(1), window_port).await;

        let main = process(Endpoint::Main, registry.clone()).await;
        let window = process(Endpoint::Window(WindowId(1)), registry).await;

        main.selection()
            .lock()
            .await
            .select("asset", ["a", "b"], SelectOptions::default())
            .await;

        // Internal events skip the origin; public mirrors reach everyone
        assert_eq!(drain(&window, &mut window_rx).await, 6);
        assert_eq!(drain(&main, &mut main_rx).await, 3);

        let replica = window.selection().lock().await;
        assert_eq!(replica.selection("asset"), vec!["a", "b"]);
        assert_eq!(replica.active("asset").as_deref(), Some("b"));
        assert_eq!(replica.global_active(), Some(("asset".into(), "b".into())));
    }

    #[tokio::test]
    async fn test_undo_changes_reach_windows() {
        let (main_port, _main_rx) = ChannelPort::pair("main");
        let (window_port, mut window_rx) = ChannelPort::pair("w1");
        let registry = Arc::new(WindowRegistry::new(main_port));
        registry.add_window(WindowId(1), window_port).await;

        let main = process(Endpoint::Main, registry).await;
        main.undo().lock().await.save().await;

        let envelope = window_rx.recv().await.unwrap();
        assert_eq!(envelope.channel, crate::undo::UNDO_CHANGED);
        assert_eq!(envelope.sender, Endpoint::Main);
    }

    #[tokio::test]
    async fn test_config_drives_router() {
        let (main_port, _main_rx) = ChannelPort::pair("main");
        let registry = Arc::new(WindowRegistry::new(main_port));
        let config = AppConfig::default().with_lang("fr");

        let context = ProcessContext::new(
            Endpoint::Main,
            registry,
            config,
            Arc::new(NullHost),
            Arc::new(NullBuilder),
        )
        .await;
        assert_eq!(context.config().lang, "fr");
        assert_eq!(context.origin(), Endpoint::Main);
        assert!(context.packages().lock().await.loaded().is_empty());
    }
}
