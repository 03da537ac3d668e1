use std::env;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use reqwest::cookie::Jar;
use rides_core::auth::{
    default_redirect_ports, flow_url, AuthError, AuthOrchestrator, AuthOutcome, Collaborators,
    CookieJarInvalidator, EndpointRegion, FileCredentialStoreFactory, FlowDecision,
    LegacyCompatibilityGuard, LoginOptions, LoopbackSurface, ManualSurface, PackageAppProbe,
    ParClient, PkcePair, PrefillInfo, Prompt, ResponseType, Scope, Session, SessionConfig,
    SsoFlow, StaticPackages, SurfaceKind, SurfacePreference, UiSurface, DEFAULT_STORAGE_KEY,
};
use rides_core::config::ConfigLocator;
use rides_core::{DesktopHost, HostEnvironment, SdkContext};
use serde_json::json;
use tokio::task;
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser, Debug)]
#[command(author, version, about = "Rides SDK authentication driver")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Authentication related commands
    #[command(subcommand)]
    Auth(AuthCommand),
}

#[derive(Subcommand, Debug)]
enum AuthCommand {
    /// Log in through the best available flow
    Login(LoginArgs),
    /// Forget stored credentials for a profile
    Logout(ProfileArgs),
    /// Show the stored credential for a profile
    Status(StatusArgs),
    /// Print the URL a flow would open, without logging in
    Url(UrlArgs),
}

#[derive(Args, Debug)]
struct ProfileArgs {
    /// Storage key for the credential
    #[arg(long, default_value = DEFAULT_STORAGE_KEY)]
    profile: String,
}

#[derive(Args, Debug)]
struct LoginArgs {
    #[command(flatten)]
    profile: ProfileArgs,
    /// Use manual copy/paste flow instead of a loopback listener
    #[arg(long)]
    manual: bool,
    /// Fall back to the authorization-code flow when no other flow applies
    #[arg(long = "auth-code")]
    auth_code: bool,
    /// Requested scopes (repeatable); unknown names are sent as custom scopes
    #[arg(long = "scope")]
    scopes: Vec<String>,
    /// Prefill the sign-in form with this email (sent as a pushed authorization request)
    #[arg(long = "prefill-email")]
    prefill_email: Option<String>,
    #[arg(long = "prefill-first-name", default_value = "")]
    prefill_first_name: String,
    #[arg(long = "prefill-last-name", default_value = "")]
    prefill_last_name: String,
    #[arg(long = "prefill-phone", default_value = "")]
    prefill_phone: String,
    /// Ask the provider to force sign-in (`login`) or consent (`consent`)
    #[arg(long, value_parser = parse_prompt)]
    prompt: Option<Prompt>,
}

#[derive(Args, Debug)]
struct StatusArgs {
    #[command(flatten)]
    profile: ProfileArgs,
    /// Output raw JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct UrlArgs {
    /// One of: sso, auth-code, implicit, install
    #[arg(long, value_parser = FlowDecision::from_str)]
    flow: FlowDecision,
    /// Requested scopes (repeatable)
    #[arg(long = "scope")]
    scopes: Vec<String>,
    /// Tag the single sign-on deeplink with the redirect-to-SDK flow
    #[arg(long = "redirect-flow")]
    redirect_flow: bool,
    #[arg(long, value_parser = parse_prompt)]
    prompt: Option<Prompt>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Auth(cmd) => match cmd {
            AuthCommand::Login(args) => auth_login(args).await?,
            AuthCommand::Logout(args) => auth_logout(args)?,
            AuthCommand::Status(args) => auth_status(args)?,
            AuthCommand::Url(args) => auth_url(args)?,
        },
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

async fn auth_login(args: LoginArgs) -> Result<()> {
    let mut config = build_session_config(&args.scopes)?;
    if let Some(email) = args.prefill_email.clone() {
        config = config.with_prefill(PrefillInfo {
            email,
            first_name: args.prefill_first_name.clone(),
            last_name: args.prefill_last_name.clone(),
            phone_number: args.prefill_phone.clone(),
        });
    }
    if let Some(prompt) = args.prompt {
        config = config.with_prompt(prompt);
    }

    let mut host = DesktopHost::detect();
    let surface: Arc<dyn UiSurface> = match choose_surface(args.manual).await {
        ChosenSurface::Loopback(surface) => {
            let redirect = surface.redirect_uri().to_string();
            host = host.with_registered_redirect(redirect.clone());
            if config.redirect_uri.is_none() {
                config = config.with_redirect_uri(redirect);
            }
            Arc::new(surface)
        }
        ChosenSurface::Manual => Arc::new(
            ManualSurface::new(print_authorization_url, prompt_for_response)
                .with_browser(SurfacePreference::detect().browser_available()),
        ),
    };
    if let Some(redirect) = &config.redirect_uri {
        host = host.with_registered_redirect(redirect.clone());
    }

    let options = LoginOptions {
        auth_code_fallback: args.auth_code,
        ..LoginOptions::default()
    };
    let context = build_context(config, host, surface)?.with_options(options);
    let orchestrator = context.orchestrator_for(&args.profile.profile);

    let outcome = match orchestrator.login().await {
        Ok(outcome) => outcome,
        Err(AuthError::MissingScopes) => {
            bail!("no scopes requested; pass --scope or set RIDES_SCOPES")
        }
        Err(err) => return Err(err).context("login failed"),
    };
    report_outcome(&args.profile.profile, outcome)
}

enum ChosenSurface {
    Loopback(LoopbackSurface),
    Manual,
}

async fn choose_surface(manual: bool) -> ChosenSurface {
    let preference = SurfacePreference::detect();
    if manual || preference.preferred() == SurfaceKind::Manual {
        return ChosenSurface::Manual;
    }
    match LoopbackSurface::bind(default_redirect_ports()).await {
        Ok(surface) => ChosenSurface::Loopback(
            surface
                .with_browser(preference.browser_available())
                .with_notify(print_authorization_url),
        ),
        Err(err) => {
            eprintln!("Unable to bind a loopback port ({err}); using manual copy/paste flow.");
            ChosenSurface::Manual
        }
    }
}

fn report_outcome(profile: &str, outcome: AuthOutcome) -> Result<()> {
    match outcome {
        AuthOutcome::Success(credential) => {
            println!("Login succeeded. Credentials stored for profile '{profile}'.");
            println!("Scopes: {}", scope_list(credential.scopes().iter().copied()));
            println!("Token expires at {} (UTC).", credential.expires_at());
            Ok(())
        }
        AuthOutcome::AuthorizationCode {
            code,
            code_verifier,
        } => {
            println!("Authorization code: {code}");
            if let Some(verifier) = code_verifier {
                println!("PKCE code verifier: {verifier}");
            }
            println!("Exchange the code from your backend to obtain a token.");
            Ok(())
        }
        AuthOutcome::Cancelled => {
            println!("Login cancelled.");
            Ok(())
        }
        AuthOutcome::Error { error, diagnostic } => match diagnostic {
            Some(detail) => bail!("login failed: {error} ({}): {detail}", error.as_code()),
            None => bail!("login failed: {error} ({})", error.as_code()),
        },
    }
}

fn auth_logout(args: ProfileArgs) -> Result<()> {
    let orchestrator = offline_orchestrator(&args.profile)?;
    orchestrator
        .logout()
        .context("failed to remove stored credentials")?;
    println!("Deleted credentials for profile '{}'.", args.profile);
    Ok(())
}

fn auth_status(args: StatusArgs) -> Result<()> {
    let orchestrator = offline_orchestrator(&args.profile.profile)?;
    let session = orchestrator.session();

    if args.json {
        let value = match &session {
            Some(Session::ServerToken(_)) => json!({ "kind": "server_token" }),
            Some(Session::AccessToken(credential)) => json!({
                "kind": "access_token",
                "token_type": credential.token_type(),
                "scopes": credential.scopes().iter().map(|s| s.name()).collect::<Vec<_>>(),
                "expires_at": credential.expires_at().to_rfc3339(),
                "expired": credential.is_expired(),
                "refreshable": credential.refresh_token().is_some(),
            }),
            None => json!(null),
        };
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    match session {
        Some(Session::ServerToken(_)) => println!("Using server token from RIDES_SERVER_TOKEN."),
        Some(Session::AccessToken(credential)) => {
            println!("Profile   : {}", args.profile.profile);
            println!("Scopes    : {}", scope_list(credential.scopes().iter().copied()));
            println!("Expires   : {}", credential.expires_at().to_rfc3339());
            if credential.is_expired() {
                println!("Status    : expired");
            }
        }
        None => println!(
            "No credentials stored for profile '{}'; run `rides auth login`.",
            args.profile.profile
        ),
    }
    Ok(())
}

fn auth_url(args: UrlArgs) -> Result<()> {
    let mut config = build_session_config(&args.scopes)?;
    if let Some(prompt) = args.prompt {
        config = config.with_prompt(prompt);
    }
    let host = DesktopHost::detect();
    let config = if config.redirect_uri.is_none() {
        config.with_redirect_uri(host.default_redirect_uri())
    } else {
        config
    };

    let url = match args.flow {
        FlowDecision::Sso => {
            let flow = if args.redirect_flow {
                SsoFlow::RedirectToSdk
            } else {
                SsoFlow::Default
            };
            flow_url::build_sso_uri(&config, &config.scopes, &config.custom_scopes, flow)?
        }
        FlowDecision::AuthCode => {
            let pkce = PkcePair::generate();
            let url = flow_url::build_web_auth_uri(
                ResponseType::Code,
                &config,
                Some(pkce.challenge()),
                None,
            )?;
            eprintln!("PKCE code verifier: {}", pkce.verifier());
            url
        }
        FlowDecision::ImplicitGrant => flow_url::build_web_auth_uri(
            ResponseType::Token,
            &config,
            None,
            None,
        )?,
        FlowDecision::InstallRedirect => flow_url::build_install_uri(&config)?,
    };
    println!("{url}");
    Ok(())
}

/// Orchestrator for commands that never present a surface.
fn offline_orchestrator(profile: &str) -> Result<AuthOrchestrator> {
    let config = SessionConfig {
        server_token: env_value("RIDES_SERVER_TOKEN"),
        ..base_session_config()?
    };
    let host = DesktopHost::detect();
    let surface = Arc::new(ManualSurface::new(
        print_authorization_url,
        prompt_for_response,
    ));
    Ok(build_context(config, host, surface)?.orchestrator_for(profile))
}

fn build_context(
    config: SessionConfig,
    host: DesktopHost,
    surface: Arc<dyn UiSurface>,
) -> Result<SdkContext> {
    let locator = ConfigLocator::new().context("unable to locate configuration directory")?;
    let jar = Arc::new(Jar::default());
    let http = reqwest::Client::builder()
        .cookie_provider(jar.clone())
        .build()
        .context("failed to build HTTP client")?;
    let invalidator = Arc::new(CookieJarInvalidator::new(jar, config.endpoint_region));
    let collaborators = Collaborators {
        probe: Arc::new(PackageAppProbe::new(StaticPackages::new())),
        host: Arc::new(host),
        surface,
        guard: LegacyCompatibilityGuard::new(),
        par: config.prefill.as_ref().map(|_| ParClient::new(http)),
    };
    let stores = Arc::new(FileCredentialStoreFactory::new(locator, invalidator));
    Ok(SdkContext::new(config, stores, collaborators))
}

fn base_session_config() -> Result<SessionConfig> {
    let client_id = env_value("RIDES_CLIENT_ID")
        .ok_or_else(|| anyhow!("RIDES_CLIENT_ID must be set to your application's client id"))?;
    let mut config = SessionConfig::new(client_id);

    if let Some(redirect) = env_value("RIDES_REDIRECT_URI") {
        Url::parse(&redirect).context("invalid RIDES_REDIRECT_URI")?;
        config = config.with_redirect_uri(redirect);
    }
    if let Some(region) = env_value("RIDES_REGION") {
        config = config.with_region(match region.to_ascii_lowercase().as_str() {
            "china" | "cn" => EndpointRegion::China,
            "default" | "global" => EndpointRegion::Default,
            other => bail!("unknown RIDES_REGION '{other}'"),
        });
    }
    Ok(config)
}

fn build_session_config(cli_scopes: &[String]) -> Result<SessionConfig> {
    let config = base_session_config()?;
    let env_scopes = env_value("RIDES_SCOPES").unwrap_or_default();
    let requested = cli_scopes
        .iter()
        .flat_map(|value| value.split_whitespace())
        .chain(env_scopes.split_whitespace())
        .map(str::to_owned)
        .collect::<Vec<_>>();

    let (standard, custom): (Vec<_>, Vec<_>) = requested
        .into_iter()
        .partition(|name| Scope::from_str(name).is_ok());
    let standard = standard
        .iter()
        .filter_map(|name| Scope::from_str(name).ok())
        .collect::<Vec<_>>();

    Ok(config.with_scopes(standard).with_custom_scopes(custom))
}

fn parse_prompt(value: &str) -> Result<Prompt, String> {
    match value.to_ascii_lowercase().as_str() {
        "login" => Ok(Prompt::Login),
        "consent" => Ok(Prompt::Consent),
        other => Err(format!("unknown prompt '{other}'; expected login or consent")),
    }
}

fn env_value(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn scope_list(scopes: impl Iterator<Item = Scope>) -> String {
    scopes.map(Scope::name).collect::<Vec<_>>().join(", ")
}

async fn prompt_for_response() -> Result<String, AuthError> {
    task::spawn_blocking(|| {
        use std::io::{self, Write};
        print!("Paste the redirect URL or authorization code (empty to cancel): ");
        io::stdout().flush().map_err(AuthError::Io)?;
        let mut input = String::new();
        io::stdin().read_line(&mut input).map_err(AuthError::Io)?;
        Ok(input.trim().to_owned())
    })
    .await
    .map_err(|_| AuthError::ListenerClosed)?
}

fn print_authorization_url(url: &Url) {
    println!("\nContinue signing in by visiting:\n  {url}\n");
}
