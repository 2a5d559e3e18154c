//! A terminal chat that shows how to use `turnstile` as a library.

#[macro_use]
extern crate tracing;

use std::env;
use std::io::Write as _;
use std::time::Duration;

use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tokio::io::{self, AsyncBufReadExt};
use tokio::select;
use tokio::time::sleep;
use turnstile::config::turn_config_from_vars;
use turnstile::core::conversation::{ToolCallRequest, ToolResultMessage};
use turnstile::core::tool::Error as ToolError;
use turnstile::core::{ControllerEvent, TurnError, TurnStream};
use turnstile::tools::{CONFIRM_WITH_USER, ConfirmRequest};
use turnstile::{RetryPolicy, Session, SessionBuilder};
use turnstile_openai_model::{OpenAIConfigBuilder, OpenAIProvider};

const BAR_CHAR: &str = "▎";

/// What to do after a turn stopped.
enum Next {
    Prompt,
    Continue(TurnStream),
    Quit,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let Ok(api_key) = env::var("OPENAI_API_KEY") else {
        eprintln!("OPENAI_API_KEY environment variable is not set");
        return;
    };
    let mut config_builder = OpenAIConfigBuilder::with_api_key(api_key);
    if let Ok(base_url) = env::var("OPENAI_BASE_URL") {
        config_builder = config_builder.with_base_url(base_url);
    }
    if let Ok(model) = env::var("OPENAI_MODEL") {
        config_builder = config_builder.with_model(model);
    }
    let model_provider = OpenAIProvider::new(config_builder.build());

    let default_prompt =
        include_str!("./system_prompt.md").replace("{{HOST_OS}}", host_os());
    let turn_config =
        match turn_config_from_vars(|name| env::var(name).ok(), &default_prompt)
        {
            Ok(config) => config,
            Err(err) => {
                eprintln!("{err}");
                return;
            }
        };
    debug!(
        "model: {}, routing: {}",
        model_provider.config().model(),
        turn_config.routing
    );

    let session = SessionBuilder::with_model_provider(model_provider)
        .with_config(turn_config)
        .build();

    let progress_style =
        match ProgressStyle::with_template("{spinner} {wide_msg}") {
            Ok(style) => style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
            Err(err) => {
                eprintln!("invalid progress template: {err}");
                return;
            }
        };

    let mut retry = RetryPolicy::new();
    loop {
        print!("> ");
        flush_stdout();

        let Some(line) = read_line().await else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut stream = session.send_message(line);
        loop {
            let Some(event) = next_event(&mut stream, &progress_style).await
            else {
                println!();
                break;
            };
            let retry_delay = retry.on_event(&event);
            let next = match event {
                ControllerEvent::AwaitingExternal { pending } => {
                    match answer_pending(&pending).await {
                        Some(results) => {
                            Next::Continue(session.submit_results(results))
                        }
                        None => Next::Quit,
                    }
                }
                ControllerEvent::Failed(err) => {
                    handle_failure(&session, err, retry_delay).await
                }
                ControllerEvent::Done { .. } => {
                    println!();
                    Next::Prompt
                }
                _ => continue,
            };
            match next {
                Next::Prompt => break,
                Next::Continue(next_stream) => stream = next_stream,
                Next::Quit => return,
            }
        }
    }
}

/// Prints the events of `stream` until a terminal one arrives, spinning
/// while nothing is being printed.
async fn next_event(
    stream: &mut TurnStream,
    progress_style: &ProgressStyle,
) -> Option<ControllerEvent> {
    let mut progress_bar = None;
    let mut in_message = false;

    loop {
        // The spinner would overwrite a partially printed message.
        if !in_message {
            progress_bar
                .get_or_insert_with(|| {
                    let progress_bar = ProgressBar::new_spinner();
                    progress_bar.set_style(progress_style.clone());
                    progress_bar.set_message("🤔 Thinking...");
                    progress_bar
                })
                .inc(1);
        }

        let sleep = sleep(Duration::from_millis(100));
        let event = select! {
            event = stream.next() => event,
            _ = sleep => continue,
        };

        // Finish the progress bar before printing anything else.
        if let Some(progress_bar) = progress_bar.take() {
            progress_bar.finish_and_clear();
        }

        let Some(event) = event else {
            return None;
        };
        match event {
            ControllerEvent::MessageDelta(delta) => {
                if !in_message {
                    print!("{}🤖 ", BAR_CHAR.bright_cyan());
                    in_message = true;
                }
                print!("{}", delta.bright_white());
                flush_stdout();
            }
            ControllerEvent::ToolDispatched(req) => {
                end_message(&mut in_message);
                println!(
                    "{}🔧 {}({})",
                    BAR_CHAR.bright_black(),
                    req.name.bright_white(),
                    req.arguments.dimmed()
                );
            }
            ControllerEvent::ToolResultAppended { id, is_error } => {
                if is_error {
                    warn!("tool call {id} failed");
                }
            }
            ControllerEvent::Invoking { iteration } => {
                end_message(&mut in_message);
                trace!("invoking model, iteration {iteration}");
            }
            event => {
                end_message(&mut in_message);
                return Some(event);
            }
        }
    }
}

/// Asks the user about every pending call. Returns `None` once stdin is
/// closed.
async fn answer_pending(
    pending: &[ToolCallRequest],
) -> Option<Vec<ToolResultMessage>> {
    let mut results = Vec::with_capacity(pending.len());
    for req in pending {
        if req.name != CONFIRM_WITH_USER {
            // Local calls starved behind an external one end up here.
            let err = ToolError::execution_error()
                .with_reason(format!("`{}` was not run", req.name));
            results.push(ToolResultMessage::failure(&req.id, &err));
            continue;
        }
        let confirm = match ConfirmRequest::from_tool_call(req) {
            Ok(confirm) => confirm,
            Err(result) => {
                results.push(result);
                continue;
            }
        };

        let bar = BAR_CHAR.bright_yellow();
        println!("\n{bar}⚠️  Agent asks:");
        println!("{bar}{}", confirm.question.bright_white().bold());
        print!("Proceed? [Y/n]: ");
        flush_stdout();

        let line = read_line().await?;
        let line = line.trim();
        let approved = line.is_empty() || line.eq_ignore_ascii_case("y");
        results.push(ConfirmRequest::answer(&req.id, approved));
        println!();
    }
    Some(results)
}

async fn handle_failure(
    session: &Session,
    err: TurnError,
    retry_delay: Option<Duration>,
) -> Next {
    let Some(delay) = retry_delay else {
        println!("{}❌ {}", BAR_CHAR.bright_red(), err.bright_red());
        return Next::Prompt;
    };

    println!(
        "{}⏳ {err}, retrying in {:.1}s",
        BAR_CHAR.bright_yellow(),
        delay.as_secs_f32()
    );
    sleep(delay).await;
    Next::Continue(session.retry())
}

fn end_message(in_message: &mut bool) {
    if *in_message {
        println!();
        *in_message = false;
    }
}

fn flush_stdout() {
    if let Err(err) = std::io::stdout().flush() {
        error!("error flushing stdout: {err}");
    }
}

async fn read_line() -> Option<String> {
    let mut stdin = io::BufReader::new(io::stdin());
    let mut line = String::new();

    match stdin.read_line(&mut line).await {
        Ok(count) => {
            if count == 0 {
                return None;
            }
            Some(line)
        }
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}

#[inline]
fn host_os() -> &'static str {
    let os = std::env::consts::OS;
    match os {
        "linux" => "Linux",
        "macos" => "macOS",
        "windows" => "Windows",
        _ => "some other OS",
    }
}
