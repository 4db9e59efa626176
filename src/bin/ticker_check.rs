//! Binary to connect to the Kite Connect ticker and subscribe to
//! NIFTY 50 (256265) and INFY on NSE (408065) for inspecting live data.
//!
//! # Usage
//!
//! ```sh
//! export KITE_API_KEY="your-api-key"
//! export KITE_ACCESS_TOKEN="your-access-token"
//! cargo run --bin ticker_check --features cli
//! ```

use std::env;
use std::time::Duration;

use kite_rs::types::Mode;
use kite_rs::{KiteError, KiteTicker, TickerEvent};
use tokio::sync::broadcast::error::RecvError;
use tokio::time;

const NIFTY_50: u32 = 256_265;
const INFY: u32 = 408_065;

#[tokio::main]
async fn main() -> kite_rs::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let api_key = env::var("KITE_API_KEY")
        .map_err(|_| KiteError::InvalidArgument("set KITE_API_KEY before running".into()))?;
    let access_token = env::var("KITE_ACCESS_TOKEN")
        .map_err(|_| KiteError::InvalidArgument("set KITE_ACCESS_TOKEN before running".into()))?;

    let mut ticker = KiteTicker::builder(api_key, access_token)
        .reconnect_max_tries(5)
        .build();
    let mut events = ticker.events();

    println!("Connecting to the Kite ticker…");
    ticker.connect()?;

    println!("Listening for events for 10 seconds…");
    println!("(Note: ticks only arrive during market hours 9:15–15:30 IST)\n");

    let deadline = time::sleep(Duration::from_secs(10));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                println!("\n10 seconds elapsed, disconnecting…");
                break;
            }
            event = events.recv() => match event {
                Ok(TickerEvent::Connected) => {
                    // Indices only stream LTP/quote sized packets, even in full mode.
                    println!("Subscribing to {NIFTY_50} NIFTY 50 (quote)…");
                    ticker.subscribe(&[NIFTY_50]).await?;

                    println!("Subscribing to {INFY} INFY (full)…");
                    ticker.subscribe(&[INFY]).await?;
                    ticker.set_mode(Mode::Full, &[INFY]).await?;
                }
                Ok(TickerEvent::RetriesExhausted) => {
                    println!("Gave up reconnecting");
                    break;
                }
                Ok(e) => println!("{e:#?}"),
                Err(RecvError::Lagged(n)) => eprintln!("Missed {n} events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    ticker.close(Some("ticker_check done")).await?;
    println!("Done.");

    Ok(())
}
