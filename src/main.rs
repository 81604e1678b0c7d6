use anyhow::Context;
use browser_zombie::{Page, Session, SessionConfig, SettlePolicy};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

/// Opens a page in headless Chrome and prints its rendered markup.
#[derive(Parser)]
#[command(name = "browser-zombie")]
#[command(version)]
struct Cli {
    /// Page to open
    url: Url,

    /// Seconds to wait after the page has loaded
    #[arg(long, conflicts_with = "validate")]
    wait: Option<f64>,

    /// Script polled until it evaluates truthy, e.g. "document.querySelector('#app')"
    #[arg(long)]
    validate: Option<String>,

    /// Operation timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Skip images and other media
    #[arg(long)]
    no_media: bool,

    #[arg(long)]
    user_agent: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    let mut config = SessionConfig::default()
        .with_timeout_ms(cli.timeout.saturating_mul(1000))
        .with_media_content(!cli.no_media);
    config.chrome.headless = !cli.headed;
    if let Some(user_agent) = cli.user_agent {
        config = config.with_user_agent(user_agent);
    }

    let settle = match (cli.wait, cli.validate) {
        (Some(secs), _) => SettlePolicy::wait_secs(secs),
        (None, Some(script)) => SettlePolicy::validate(script),
        (None, None) => SettlePolicy::None,
    };

    let session = Session::launch(config).context("failed to launch chrome")?;
    info!(url = %cli.url, "opening page");

    match session.open_then::<Page>(cli.url, settle).run().await {
        Ok(page) => {
            println!("{}", String::from_utf8_lossy(page.body()));
            Ok(())
        }
        Err(err) => {
            error!("page could not be opened: {err}");
            Err(err.into())
        }
    }
}
