//! `promptgate serve`: JSON-RPC over stdio.
//!
//! One request (or batch) per line on stdin, one response per line on
//! stdout. Logs go to stderr so they never interleave with responses.

use promptgate_core::rpc::RpcRouter;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

pub async fn run(router: &RpcRouter) -> Result<(), String> {
    tracing::info!(
        "[Serve] Listening on stdio ({} methods)",
        router.method_list().len()
    );
    let reader = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let handled = serve_lines(router, reader, &mut stdout).await?;
    tracing::info!("[Serve] stdin closed after {} request(s), shutting down", handled);
    Ok(())
}

/// Answer every non-blank line of `reader` on `writer`. Returns the number
/// of requests handled.
pub async fn serve_lines<R, W>(router: &RpcRouter, reader: R, writer: &mut W) -> Result<usize, String>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut handled = 0;

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| format!("Failed to read request: {}", e))?
    {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = router.handle_request(line).await;
        writer
            .write_all(format!("{}\n", response).as_bytes())
            .await
            .map_err(|e| format!("Failed to write response: {}", e))?;
        writer
            .flush()
            .await
            .map_err(|e| format!("Failed to flush response: {}", e))?;
        handled += 1;
    }
    Ok(handled)
}
