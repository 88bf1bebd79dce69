use clap::Parser;
use colored::*;
use parley::api::HttpChatApi;
use parley::artifact::FsArtifactStore;
use parley::config::Args;
use parley::kernel::{Collaborators, ConversationKernel, KernelHandle, UiEvent};
use parley::playback::LoggingPlayer;
use parley::types::{ConversationId, Role};
use parley::ws::CableChannel;
use std::sync::Arc;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let _guards = match parley::logging::init_tracing(&args.log_dir) {
        Ok(guards) => guards,
        Err(e) => {
            eprintln!("Error: could not initialize logging: {}", e.inner);
            std::process::exit(1);
        }
    };
    parley::logging::setup_panic_hook();

    let config = match args.reconcile_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e.inner);
            std::process::exit(2);
        }
    };

    let api = match HttpChatApi::new(&args.base_url, args.token.clone(), config.fetch_timeout) {
        Ok(api) => api,
        Err(e) => {
            tracing::error!("Failed to build HTTP client: {}", e.inner);
            std::process::exit(1);
        }
    };

    let push = CableChannel::new(
        &args.ws_url,
        args.token.as_deref(),
        config.push_connect_timeout,
        config.push_connect_attempts,
        config.push_retry_delay_ms,
    );

    let collaborators = Collaborators {
        push: Arc::new(push),
        api: Arc::new(api),
        store: Arc::new(FsArtifactStore::new(&args.artifact_dir)),
        player: Arc::new(LoggingPlayer::default()),
    };

    let conversation_id = ConversationId::from(args.conversation_id.clone());
    println!(
        "{} conversation {} ({:?})",
        "parley".bold().cyan(),
        conversation_id.to_string().bold(),
        args.mode()
    );

    let (handle, kernel_task) =
        ConversationKernel::spawn(conversation_id, args.mode(), &config, collaborators);
    let rx_ui = handle.subscribe();

    if let Some(message) = &args.message {
        if let Err(e) = handle.send(message.clone()).await {
            eprintln!("{} {}", "send failed:".red(), e.inner);
        }
    }

    let one_shot = args.message.is_some();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("{}", "interrupted".dimmed());
        }
        _ = print_events(rx_ui, &handle, one_shot) => {}
    }

    handle.cancel();
    if let Err(e) = kernel_task.await {
        tracing::error!("Kernel task failed: {}", e);
    }
}

/// Renders UI events until the outstanding send settles (when `one_shot`) or the kernel stops.
async fn print_events(mut rx: broadcast::Receiver<UiEvent>, handle: &KernelHandle, one_shot: bool) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                println!("{}", format!("({} events skipped)", n).dimmed());
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };

        match event {
            UiEvent::TurnAppended(turn) => {
                let who = match turn.role {
                    Role::User => "you".green().bold(),
                    Role::Assistant => "assistant".blue().bold(),
                };
                let audio = if turn.audio_uri.is_some() { " ♪" } else { "" };
                println!("{}{}: {}", who, audio.magenta(), turn.content);
            }
            UiEvent::AudioAttached(turn) => {
                println!("{}", format!("audio arrived for {}", turn.short_id()).magenta());
            }
            UiEvent::WaitingForResponse(true) => println!("{}", "…".dimmed()),
            UiEvent::WaitingForResponse(false) => {
                if one_shot {
                    if let Ok(snapshot) = handle.snapshot().await {
                        tracing::debug!("Settled with {} turns", snapshot.turns.len());
                    }
                    return;
                }
            }
            UiEvent::SoftTimeout => println!("{}", "still waiting for a reply…".yellow()),
            UiEvent::HardTimeout => {
                println!("{}", "no reply received; try refreshing".red().bold());
                if one_shot {
                    return;
                }
            }
            UiEvent::ConnectionBanner(status) => {
                println!("{}", format!("[connection: {}]", status).dimmed());
            }
            UiEvent::ErrorBanner { kind, message } => {
                println!("{} {}", format!("[{:?}]", kind).red(), message);
            }
            UiEvent::MessageLimitReached => {
                println!("{}", "message limit reached".red().bold());
                if one_shot {
                    return;
                }
            }
            UiEvent::Escalation(state) => tracing::debug!("Escalation: {}", state),
        }
    }
}
