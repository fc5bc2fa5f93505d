//! Kiln daemon entry point.
//!
//! `kilnd serve` runs the IPC server; every other subcommand is a thin
//! client against a running instance.

use std::process::ExitCode;

use kiln::config;
use kiln::ipc::{ClientError, IpcClient, Request, Response};
use kiln::telemetry::init_logging;
use kiln::Runtime;

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("serve");

    match command {
        "serve" | "" => run_serve().await,
        "models" => run_client(Request::Models).await,
        "status" => run_client(Request::Status).await,
        "load" => match parse_key(&args) {
            Some((model, device)) => run_client(Request::Load { model, device }).await,
            None => usage_error("load MODEL [DEVICE]"),
        },
        "unload" => match parse_key(&args) {
            Some((model, device)) => run_client(Request::Unload { model, device }).await,
            None => usage_error("unload MODEL [DEVICE]"),
        },
        "chat" => match (args.get(2), args.get(3)) {
            (Some(model), Some(message)) => {
                let device = args.get(4).cloned().unwrap_or_else(|| "auto".to_string());
                run_client(Request::Chat {
                    chat_id: None,
                    model: model.clone(),
                    device,
                    message: message.clone(),
                })
                .await
            }
            _ => usage_error("chat MODEL MESSAGE [DEVICE]"),
        },
        "chats" => run_client(Request::Chats).await,
        "history" => match args.get(2) {
            Some(chat_id) => run_client(Request::History { chat_id: chat_id.clone() }).await,
            None => usage_error("history CHAT_ID"),
        },
        "clear-history" => run_client(Request::ClearHistory).await,
        "version" | "--version" | "-V" => {
            println!("kiln {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        "help" | "--help" | "-h" => {
            print_usage();
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

async fn run_serve() -> ExitCode {
    let config = config::load();
    if let Err(e) = init_logging(&config.log) {
        eprintln!("Logging init failed: {}", e);
        return ExitCode::FAILURE;
    }
    tracing::info!(
        models_dir = %config.models_dir.display(),
        history_dir = %config.history_dir.display(),
        "starting kiln"
    );
    let runtime = Runtime::new(&config);
    match runtime.serve().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Server error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn parse_key(args: &[String]) -> Option<(String, String)> {
    let model = args.get(2)?.clone();
    let device = args.get(3).cloned().unwrap_or_else(|| "auto".to_string());
    Some((model, device))
}

async fn run_client(request: Request) -> ExitCode {
    let client = IpcClient::new(config::socket_path());
    match client.request(&request).await {
        Ok(response) => print_response(&response),
        Err(ClientError::Connect(e)) => {
            eprintln!("Error connecting to kiln server: {}", e);
            eprintln!("Is the server running? Check KILN_SOCKET_PATH.");
            ExitCode::from(3)
        }
        Err(e) => {
            eprintln!("Request failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_response(response: &Response) -> ExitCode {
    match response {
        Response::Loaded { model, device, resolved_device, load_time_s, cache_hit } => {
            if *cache_hit {
                println!("{} ({}) already resident on {}", model, device, resolved_device);
            } else {
                println!(
                    "Loaded {} ({}) on {} in {:.2}s",
                    model, device, resolved_device, load_time_s
                );
            }
        }
        Response::Unloaded { model, device, unloaded } => {
            if *unloaded {
                println!("Unloaded {} ({})", model, device);
            } else {
                println!("{} ({}) was not loaded; nothing to do", model, device);
            }
        }
        Response::ChatReply { chat_id, response, tokens, time_s, tps } => {
            println!("{}", response);
            println!();
            println!(
                "[chat {} | {} tokens | {:.2}s | {:.1} tok/s]",
                chat_id, tokens, time_s, tps
            );
        }
        Response::StatusReport { loaded, model, device } => match (loaded, model, device) {
            (true, Some(model), Some(device)) => println!("Loaded: {} ({})", model, device),
            _ => println!("No model loaded."),
        },
        Response::Models { models } => {
            if models.is_empty() {
                println!("No models found under the models root.");
            } else {
                for name in models {
                    println!("{}", name);
                }
            }
        }
        Response::Chats { chats } => {
            if chats.is_empty() {
                println!("No conversations yet.");
            } else {
                for chat in chats {
                    println!("{:<38} {}", chat.chat_id, chat.title);
                }
            }
        }
        Response::History { messages } => {
            for record in messages {
                let sender = match record.sender {
                    kiln::history::Sender::User => "USER",
                    kiln::history::Sender::Assistant => "BOT",
                };
                println!("{} | {}: {}", record.timestamp.to_rfc3339(), sender, record.text);
            }
        }
        Response::HistoryCleared { removed } => {
            println!("Cleared {} conversation(s)", removed);
        }
        Response::Error { code, message } => {
            eprintln!("Error {}: {}", code, message);
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}

fn usage_error(expected: &str) -> ExitCode {
    eprintln!("Usage: kilnd {}", expected);
    ExitCode::from(2)
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "kiln - offline chat runtime v{version}

USAGE:
    kilnd [COMMAND] [ARGS]

COMMANDS:
    serve                       Run the IPC server (default when no command given)
    models                      List model directories under the models root
    status                      Show which model is currently resident
    load MODEL [DEVICE]         Load a model (device: auto, cpu, gpu; default auto)
    unload MODEL [DEVICE]       Unload a model
    chat MODEL MESSAGE [DEVICE] Send one message and print the reply
    chats                       List conversations
    history CHAT_ID             Print one conversation transcript
    clear-history               Delete all conversations
    version                     Show version information
    help                        Show this help message

EXAMPLES:
    kilnd                          # Run the IPC server
    kilnd load gpt2 cpu            # Keep gpt2 resident on the CPU
    kilnd chat gpt2 \"Hello\" cpu    # Generate against the resident model
    kilnd unload gpt2 cpu          # Release it again

Configuration comes from kiln.toml and KILN_* environment variables;
see `config` module docs for the full table."
    );
}
