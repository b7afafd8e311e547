//! `easel test` and `easel build`

use easel_core::events::{EventSink, StdoutEventSink};
use easel_core::ipc::{Address, ChannelPort, Endpoint, Envelope, WindowId, WindowRegistry};
use easel_core::{AppConfig, AppError, ProcessContext};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::host::{FileModuleHost, ScriptBuilder};

const CONSOLE_WINDOW: WindowId = WindowId(1);

/// A main process with one console window that prints what it receives
pub struct Session {
    pub context: ProcessContext,
    console: JoinHandle<()>,
    stop_console: oneshot::Sender<()>,
    main_inbox: JoinHandle<()>,
}

async fn print(sink: &StdoutEventSink, envelope: Envelope) {
    if let Err(e) = sink
        .emit(Address::Window(CONSOLE_WINDOW), &envelope.channel, envelope.args)
        .await
    {
        error!("Failed to print event: {}", e);
    }
}

impl Session {
    pub async fn start(config: AppConfig, event_sink: StdoutEventSink) -> Self {
        let (main_port, main_rx) = ChannelPort::pair("main");
        let (console_port, mut console_rx) = ChannelPort::pair("console");
        let registry = Arc::new(WindowRegistry::new(main_port));
        registry.add_window(CONSOLE_WINDOW, console_port).await;

        let builder = Arc::new(ScriptBuilder::new(config.packages.build_command.clone()));
        let context = ProcessContext::new(
            Endpoint::Main,
            registry,
            config,
            Arc::new(FileModuleHost::default()),
            builder,
        )
        .await;
        let main_inbox = context.spawn_inbox(main_rx);

        let (stop_console, mut stop_rx) = oneshot::channel::<()>();
        let console = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    envelope = console_rx.recv() => match envelope {
                        Some(envelope) => print(&event_sink, envelope).await,
                        None => break,
                    },
                    _ = &mut stop_rx => {
                        while let Ok(envelope) = console_rx.try_recv() {
                            print(&event_sink, envelope).await;
                        }
                        break;
                    }
                }
            }
        });

        Self {
            context,
            console,
            stop_console,
            main_inbox,
        }
    }

    /// Print whatever the console still has queued, then shut down
    pub async fn finish(self) {
        let _ = self.stop_console.send(());
        let _ = self.console.await;
        self.context.registry().close_window(CONSOLE_WINDOW).await;
        self.main_inbox.abort();
    }
}

/// Load a package with its dependencies, report, then unload everything
pub async fn run_test(session: &Session, path: &Path) -> Result<(), AppError> {
    let mut packages = session.context.packages().lock().await;
    let found = packages.discover()?;
    info!("Testing {} ({} package(s) on search paths)", path.display(), found);

    let manifest = packages.load(path).await?;
    println!("Loaded {}@{}", manifest.name, manifest.version);
    for loaded in packages.loaded() {
        println!("  {}@{} {}", loaded.name, loaded.version, loaded.path.display());
    }

    let failures = packages.unload_all().await;
    if let Some((path, e)) = failures.into_iter().next() {
        return Err(AppError::Other(format!("Failed to unload {}: {e}", path.display())));
    }
    println!("Unloaded {}", manifest.name);
    Ok(())
}

/// Force the build step for one package
pub async fn run_build(session: &Session, path: &Path) -> Result<(), AppError> {
    let mut packages = session.context.packages().lock().await;
    let dest = packages.build(path).await?;
    println!("Built {} into {}", path.display(), dest.display());
    Ok(())
}
