//! Interactive streaming chat on the terminal.
//!
//! Run with:
//! ```bash
//! export ANTHROPIC_API_KEY="your-api-key"
//! cargo run --example stream_chat -- claude-3-5-haiku-latest
//! ```
//!
//! Type `/reset` to clear the history and an empty line to quit.

use std::io::{self, BufRead, Write};

use chatstream::config::ChatConfig;
use chatstream::credentials::EnvCredentials;
use chatstream::{Chat, StreamCallbacks};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt::init();

    let model = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "claude-3-5-haiku-latest".to_string());
    let config = ChatConfig {
        model: Some(model),
        max_length: Some(1024),
        temperature: Some(0.7),
        ..ChatConfig::default()
    };

    let mut chat = Chat::from_config(&config, &EnvCredentials).await?;
    println!("Chatting with {} ({})", config.model.as_deref().unwrap_or_default(), config.provider_kind()?);

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 || line.trim().is_empty() {
            break;
        }
        if line.trim() == "/reset" {
            chat.reset();
            continue;
        }

        // The callback gets the whole answer so far; print only what is new.
        let mut printed = 0;
        let callbacks = StreamCallbacks::new().on_update(|text| {
            print!("{}", text.get(printed..).unwrap_or(text));
            printed = text.len();
            io::stdout().flush()?;
            Ok(())
        });

        match chat.send(line.trim(), callbacks).await {
            Ok(result) => println!("\n[{:?}]", result.stop_reason),
            Err(e) => eprintln!("\nerror: {e} ({})", e.hint()),
        }
    }
    Ok(())
}
