use autosync_core::auth::{Identity, KeyringIdentityStore};
use autosync_core::config::Config;
use autosync_core::keys::{init_keyring, KeyService};
use autosync_core::oauth::{self, OAuthConfig, OAuthTokens, YOUTUBE_READONLY_SCOPE};
use autosync_core::{
    AuthSession, Collaborators, GitHubContents, OAuthTokenProvider, SyncController,
    YouTubeClient,
};
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// autosync: pick YouTube playlists and commit the selection to a GitHub repository.
#[derive(Parser)]
#[command(name = "autosync")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in with Google in the browser.
    Login,
    /// Forget the cached Google identity.
    Logout,
    /// Print the sign-in state.
    Status,
    /// List playlists, optionally filtered by title.
    List {
        #[arg(long)]
        query: Option<String>,
    },
    /// Print the first page of videos in a playlist.
    Preview { playlist_id: String },
    /// Select playlists by id and commit the selection.
    Sync {
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(long)]
        query: Option<String>,
    },
    /// Read a GitHub personal access token from stdin and store it.
    SetGithubToken,
}

fn configure_logging() {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_line_number(true)
        .with_target(false)
        .with_file(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

#[tokio::main]
async fn main() {
    configure_logging();
    let args = Args::parse();

    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load config: {e}");
        std::process::exit(1);
    });
    init_keyring();
    let keys = KeyService::new(
        config.dev_mode,
        format!("{}/{}", config.repo_owner, config.repo_name),
    );

    if let Command::SetGithubToken = args.command {
        store_github_token(&keys);
        return;
    }

    let scope = CancellationToken::new();
    {
        let scope = scope.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, cancelling");
                scope.cancel();
            }
        });
    }

    let github_token = keys.get_github_token();
    if matches!(args.command, Command::Sync { .. }) && github_token.is_none() {
        error!("No GitHub token stored; run `autosync set-github-token` first");
        std::process::exit(1);
    }

    let oauth_config = OAuthConfig::google(&config);
    let controller = SyncController::new(
        config.sync_config(),
        Collaborators {
            identities: Arc::new(KeyringIdentityStore::new(keys.clone())),
            tokens: Arc::new(OAuthTokenProvider::new(
                oauth_config.clone(),
                YOUTUBE_READONLY_SCOPE,
            )),
            catalog: Arc::new(YouTubeClient::new(&config.youtube_api_url)),
            files: Arc::new(GitHubContents::new(
                &config.github_api_url,
                &config.repo_owner,
                &config.repo_name,
                github_token.unwrap_or_default(),
            )),
        },
        scope.clone(),
    );

    match args.command {
        Command::Login => {
            let result = tokio::select! {
                _ = scope.cancelled() => return,
                result = oauth::authorize(&oauth_config) => result,
            };
            match result {
                Ok(tokens) if config.dev_mode => print_dev_identity(tokens),
                Ok(tokens) => println!("{}", controller.complete_sign_in(tokens).await),
                Err(e) => {
                    controller.on_sign_in_failed(e.to_string());
                    error!("Sign-in failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Command::Logout => {
            if let Err(e) = controller.sign_out() {
                error!("Failed to sign out: {e}");
                std::process::exit(1);
            }
            println!("{}", controller.auth_state());
        }
        Command::Status => println!("{}", controller.check_status()),
        Command::List { query } => {
            require_signed_in(controller.start().await);
            if let Some(query) = query {
                controller.set_query(query);
            }
            print_catalog(&controller);
        }
        Command::Preview { playlist_id } => {
            require_signed_in(controller.check_status());
            for video in controller.preview(&playlist_id).await {
                println!("{}  {}", video.video_id, video.title);
            }
        }
        Command::Sync { ids, query } => {
            require_signed_in(controller.start().await);
            for id in &ids {
                if !controller.toggle(id) {
                    warn!("Playlist {id} is not in the catalog, skipping");
                }
            }
            if let Some(query) = query {
                controller.set_query(query);
            }
            print_catalog(&controller);

            match controller.commit().await {
                Some(status) => {
                    println!("{status}");
                    if !status.is_success() {
                        std::process::exit(1);
                    }
                }
                None => {
                    error!("Sync cancelled");
                    std::process::exit(130);
                }
            }
        }
        Command::SetGithubToken => {}
    }
}

fn require_signed_in(session: AuthSession) {
    if !matches!(session, AuthSession::Authenticated(_)) {
        error!("Not signed in ({session}); run `autosync login` first");
        std::process::exit(1);
    }
}

fn print_catalog(controller: &SyncController) {
    for item in controller.filtered() {
        let mark = if item.is_selected { "x" } else { " " };
        println!("[{mark}] {}  {}", item.id, item.title);
    }
}

/// Dev mode keeps nothing between runs, so hand the identity back to the
/// shell instead of saving it.
fn print_dev_identity(tokens: OAuthTokens) {
    let identity = Identity::from_tokens(tokens);
    match serde_json::to_string(&identity) {
        Ok(json) => {
            eprintln!("Dev mode: the sign-in is not saved. Export it for later runs:");
            println!("export AUTOSYNC_IDENTITY='{json}'");
        }
        Err(e) => {
            error!("Failed to serialize identity: {e}");
            std::process::exit(1);
        }
    }
}

fn store_github_token(keys: &KeyService) {
    if keys.is_dev_mode() {
        error!("Dev mode: set AUTOSYNC_GITHUB_PAT in the environment instead");
        std::process::exit(1);
    }
    eprintln!("Paste a GitHub personal access token with contents:write, then press Enter:");
    let mut line = String::new();
    if let Err(e) = std::io::stdin().lock().read_line(&mut line) {
        error!("Failed to read token: {e}");
        std::process::exit(1);
    }
    let token = line.trim();
    if token.is_empty() {
        error!("No token entered");
        std::process::exit(1);
    }
    if let Err(e) = keys.set_github_token(token) {
        error!("Failed to store token: {e}");
        std::process::exit(1);
    }
}
