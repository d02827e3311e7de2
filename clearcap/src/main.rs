use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clearcap::ocr::{Recognizer, TesseractRecognizer};
use clearcap::providers::CaptchaTask;
use clearcap::{
    Config, ImageArtifact, Pipeline, ProviderCredentials, ResolutionResult, ResolveOptions,
    ResolveRequest, TokenRequest,
};

#[derive(Parser)]
#[command(name = "clearcap")]
#[command(about = "Resolve captchas with local OCR first and paid solvers only when needed")]
struct Args {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read a text captcha image
    Image(ImageArgs),
    /// Obtain a reCAPTCHA or hCaptcha response token
    Token(TokenArgs),
}

#[derive(clap::Args)]
struct ImageArgs {
    path: PathBuf,

    /// Minimum local confidence (0-100) to skip paid providers
    #[arg(long)]
    threshold: Option<f32>,

    #[arg(long)]
    expected_length: Option<usize>,

    /// Run only the default preprocessing variant
    #[arg(long)]
    single_pass: bool,

    /// Fold look-alike letters to digits everywhere
    #[arg(long)]
    aggressive: bool,

    /// Provider credential as id=key; repeatable, overrides the environment
    #[arg(long = "credential", value_parser = parse_credential)]
    credentials: Vec<(String, String)>,

    /// Give up after this many seconds
    #[arg(long)]
    deadline_secs: Option<u64>,
}

#[derive(Clone, Copy, ValueEnum)]
enum TokenKind {
    RecaptchaV2,
    RecaptchaV3,
    #[value(name = "hcaptcha")]
    HCaptcha,
}

#[derive(clap::Args)]
struct TokenArgs {
    kind: TokenKind,

    #[arg(long)]
    site_key: String,

    #[arg(long)]
    page_url: String,

    /// reCAPTCHA v3 action name
    #[arg(long)]
    action: Option<String>,

    /// reCAPTCHA v3 minimum score
    #[arg(long, default_value_t = 0.3)]
    min_score: f64,

    /// reCAPTCHA v2 invisible widget
    #[arg(long)]
    invisible: bool,

    #[arg(long = "credential", value_parser = parse_credential)]
    credentials: Vec<(String, String)>,

    #[arg(long)]
    deadline_secs: Option<u64>,
}

impl TokenArgs {
    fn task(&self) -> CaptchaTask {
        match self.kind {
            TokenKind::RecaptchaV2 => CaptchaTask::RecaptchaV2 {
                site_key: self.site_key.clone(),
                page_url: self.page_url.clone(),
                invisible: self.invisible,
            },
            TokenKind::RecaptchaV3 => CaptchaTask::RecaptchaV3 {
                site_key: self.site_key.clone(),
                page_url: self.page_url.clone(),
                action: self.action.clone(),
                min_score: self.min_score,
            },
            TokenKind::HCaptcha => CaptchaTask::HCaptcha {
                site_key: self.site_key.clone(),
                page_url: self.page_url.clone(),
            },
        }
    }
}

fn parse_credential(raw: &str) -> Result<(String, String), String> {
    ProviderCredentials::parse_pair(raw)
}

fn credentials(pairs: Vec<(String, String)>) -> ProviderCredentials {
    ProviderCredentials::from_env().merged(pairs.into_iter().collect())
}

async fn with_deadline<F>(deadline_secs: Option<u64>, fut: F) -> anyhow::Result<ResolutionResult>
where
    F: Future<Output = clearcap::Result<ResolutionResult>>,
{
    match deadline_secs {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), fut)
            .await
            .map_err(|_| anyhow::anyhow!("Deadline of {secs}s exceeded"))?
            .map_err(Into::into),
        None => Ok(fut.await?),
    }
}

fn init_tracing(json: bool) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clearcap=info".into()),
        )
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    dotenvy::dotenv().ok();

    init_tracing(args.json_logs);

    let config = Config::from_env();

    let result = match args.command {
        Command::Image(image) => {
            let bytes = tokio::fs::read(&image.path)
                .await
                .with_context(|| format!("Failed to read {}", image.path.display()))?;

            let recognizer: Arc<dyn Recognizer> = Arc::new(TesseractRecognizer::new(&config.ocr));
            let pipeline = Pipeline::from_config(config, recognizer)?;

            let mut request = ResolveRequest::new(ImageArtifact::from_bytes(bytes))
                .with_credentials(credentials(image.credentials))
                .with_options(ResolveOptions {
                    multi_pass: image.single_pass.then_some(false),
                    aggressive: image.aggressive.then_some(true),
                    ..ResolveOptions::default()
                });
            request.confidence_threshold = image.threshold;
            request.expected_length = image.expected_length;

            with_deadline(image.deadline_secs, pipeline.resolve(request)).await?
        }
        Command::Token(token) => {
            let recognizer: Arc<dyn Recognizer> = Arc::new(TesseractRecognizer::unavailable(
                "local OCR is not used for token captchas",
            ));
            let pipeline = Pipeline::from_config(config, recognizer)?;

            let request = TokenRequest {
                task: token.task(),
                credentials: credentials(token.credentials.clone()),
            };
            with_deadline(token.deadline_secs, pipeline.solve_token(request)).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
