/// GET / — liveness probe for the hosting platform.
pub async fn health() -> &'static str {
    "cumple is up. Use /run to send reminders, /warmup then /qr to pair."
}
