#[cfg(test)]
mod tests {
    use idex_macros::test_traced;
    use std::time::Duration;
    use tracing::{debug, error, info};

    #[test_traced("INFO")]
    fn test_info_level() {
        info!("This is an info log");
        debug!("This is a debug log (won't be shown)");
        assert_eq!(2 + 2, 4);
    }

    #[test_traced]
    fn test_default_level() {
        debug!("This is a debug log");
        assert_eq!(3 * 3, 9);
    }

    #[test_traced("error")]
    fn test_lowercase_level() {
        error!("This is an error log");
        assert_eq!(5 * 2, 10);
    }

    #[test_traced]
    async fn test_async_body() {
        tokio::time::sleep(Duration::from_millis(1)).await;
        info!("slept");
    }

    #[test_traced("WARN")]
    async fn test_async_spawned_task() {
        let handle = tokio::spawn(async { 7 * 6 });
        assert_eq!(handle.await.unwrap(), 42);
    }

    #[test_traced]
    async fn test_async_result() -> Result<(), String> {
        Ok(())
    }
}
