use clap::Parser;
use common::verbosity::level_filter;
use common::ShutdownMessage;
use proxy::bayes::evaluator::ProbabilityEngine;
use proxy::classify::QueryClassifier;
use proxy::policy::sensitive::SensitiveNames;
use proxy::policy::whitelist::QueryWhitelist;
use proxy::server::login_check::load_login_filter;
use proxy::server::proxy_cli_args::FirewallArgs;
use proxy::server::session::run_session;
use proxy::server::{connect_to_server, ConnectAddr, FirewallContext, ListenAddr};
use std::sync::Arc;
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

async fn shutdown_signal() -> ShutdownMessage {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        ctrl_c_v = ctrl_c => {
            let msg = format!("firewall received ctrl_c signal {ctrl_c_v:?}");
            ShutdownMessage::Cancel(msg)
        },
        v = terminate => {
            let msg = format!("firewall received terminate signal {v:?}");
            ShutdownMessage::Cancel(msg)
        },
    }
}

async fn build_context(args: &FirewallArgs, connect: &ConnectAddr) -> anyhow::Result<FirewallContext> {
    let engine = ProbabilityEngine::load_from_dir(args.network_dir())?;
    info!(
        "loaded attack networks from {} ({} evaluator copies)",
        args.network_dir().display(),
        engine.pool_size()
    );

    let sensitive = SensitiveNames::from_options(
        args.password_regex.as_deref(),
        args.password_substring.as_deref(),
        args.user_regex.as_deref(),
        args.user_substring.as_deref(),
    )?;

    let whitelist = QueryWhitelist::load(
        args.parse_whitelist.as_deref(),
        args.block_whitelist.as_deref(),
        &sensitive,
    )?;

    let login_filter =
        load_login_filter(connect, args.user.as_deref(), args.password.as_deref()).await;

    Ok(FirewallContext {
        classifier: QueryClassifier::new(engine),
        whitelist,
        sensitive,
        login_filter,
    })
}

fn spawn_session<CR, CW>(
    ctx: Arc<FirewallContext>,
    connect: ConnectAddr,
    client_reader: CR,
    client_writer: CW,
    client_host: String,
) where
    CR: tokio::io::AsyncRead + Send + Unpin + 'static,
    CW: tokio::io::AsyncWrite + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        match connect_to_server(&connect).await {
            Ok((server_reader, server_writer)) => {
                if let Err(e) = run_session(
                    ctx,
                    client_reader,
                    client_writer,
                    client_host,
                    server_reader,
                    server_writer,
                )
                .await
                {
                    info!("session closed: {e}");
                }
            }
            Err(e) => {
                warn!("unable to reach the protected server: {e}");
            }
        }
    });
}

fn main() -> anyhow::Result<()> {
    let mut args = FirewallArgs::parse();
    args.merge_config_file()?;
    let endpoints = args.validate()?;

    let level = level_filter(args.verbose, args.quiet);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_line_number(true)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("SQLSHIELD")
        .build()?;

    info!("firewall starting with {args:?}");
    let (shutdown_tx, _shutdown_rx) = watch::channel(ShutdownMessage::Init);

    runtime.block_on(async {
        let ctx = Arc::new(build_context(&args, &endpoints.connect).await?);

        match endpoints.listen {
            ListenAddr::Tcp(port) => {
                let listener = TcpListener::bind(("0.0.0.0", port)).await?;
                info!("listening on port {port}");
                loop {
                    tokio::select! {
                        shutdown_msg = shutdown_signal() => {
                            shutdown_tx.send(shutdown_msg).ok();
                            break;
                        }
                        accepted = listener.accept() => {
                            match accepted {
                                Ok((stream, addr)) => {
                                    stream.set_nodelay(true).ok();
                                    let (reader, writer) = stream.into_split();
                                    spawn_session(
                                        Arc::clone(&ctx),
                                        endpoints.connect.clone(),
                                        reader,
                                        writer,
                                        addr.ip().to_string(),
                                    );
                                }
                                Err(e) => warn!("accept failed: {e}"),
                            }
                        }
                    }
                }
            }
            ListenAddr::Unix(ref path) => {
                // A stale socket file from a previous run would make bind
                // fail.
                let _ = std::fs::remove_file(path);
                let listener = UnixListener::bind(path)?;
                info!("listening on {}", path.display());
                loop {
                    tokio::select! {
                        shutdown_msg = shutdown_signal() => {
                            shutdown_tx.send(shutdown_msg).ok();
                            break;
                        }
                        accepted = listener.accept() => {
                            match accepted {
                                Ok((stream, _)) => {
                                    let (reader, writer) = stream.into_split();
                                    spawn_session(
                                        Arc::clone(&ctx),
                                        endpoints.connect.clone(),
                                        reader,
                                        writer,
                                        "localhost".to_string(),
                                    );
                                }
                                Err(e) => warn!("accept failed: {e}"),
                            }
                        }
                    }
                }
                let _ = std::fs::remove_file(path);
            }
        }

        info!("firewall shut down cleanly");
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}
