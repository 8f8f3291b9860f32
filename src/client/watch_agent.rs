use anyhow::{Context, Result};
use payment_pulse::{
    client::{ClientStatusPoller, HttpStatusApi, PollState},
    config::PollerConfig,
    models::InitiatePaymentRequest,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    dotenvy::dotenv().ok();

    let base_url = std::env::var("PAYMENT_PULSE_URL")
        .unwrap_or_else(|_| "http://localhost:8080".to_string());
    let amount: f64 = std::env::var("WATCH_AMOUNT")
        .unwrap_or_else(|_| "100".to_string())
        .parse()
        .context("WATCH_AMOUNT must be a number")?;
    let user_id = std::env::var("WATCH_USER_ID").ok();

    println!("Payment Pulse Watch Agent");
    println!("=========================");
    println!("Server: {}", base_url);
    println!("Amount: {:.2}", amount);
    println!();

    let api = HttpStatusApi::new(&base_url, Duration::from_secs(10))?;
    let poller = ClientStatusPoller::new(Arc::new(api), PollerConfig::default());
    let mut updates = poller.subscribe();

    let snapshot = poller
        .initiate(InitiatePaymentRequest {
            user_id,
            amount,
            method: "mpesa".to_string(),
        })
        .await;

    match &snapshot.payment_id {
        Some(id) => println!("[OK] Payment initiated: {}", id),
        None => {
            println!(
                "[FAILED] {}",
                snapshot.message.as_deref().unwrap_or("initiation failed")
            );
            return Ok(());
        }
    }

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                println!(
                    "[{:?}] attempt {} - {}",
                    snapshot.state,
                    snapshot.attempts,
                    snapshot.message.as_deref().unwrap_or("")
                );
                if snapshot.state.is_settled() {
                    break;
                }
                if snapshot.state == PollState::AwaitingConfirmation {
                    println!("No confirmation yet, checking once more...");
                    let checked = poller.check_now().await;
                    if checked.state == PollState::AwaitingConfirmation {
                        println!("Still unconfirmed. The server has the final word; check again later.");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("Cancelling payment...");
                match poller.cancel().await {
                    Ok(snapshot) => println!(
                        "[{:?}] {}",
                        snapshot.state,
                        snapshot.message.as_deref().unwrap_or("")
                    ),
                    Err(e) => println!("[FAILED] Cancel request failed: {}", e),
                }
                break;
            }
        }
    }

    poller.close();
    Ok(())
}
