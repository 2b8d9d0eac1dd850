//! In-process WebSocket subscribers for tests.

use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

/// Accept clients forever, handing every text frame to `sink`.
pub async fn serve_collector<F>(listener: TcpListener, sink: F)
where
    F: Fn(String) + Clone + Send + 'static,
{
    while let Ok((stream, _)) = listener.accept().await {
        let sink = sink.clone();
        tokio::spawn(async move {
            let mut ws = match tokio_tungstenite::accept_async(stream).await {
                Ok(ws) => ws,
                Err(_) => return,
            };
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    sink(text.as_str().to_owned());
                }
            }
        });
    }
}

/// Collector running on its own thread and runtime, for tests that block.
pub fn collector_thread() -> (String, std::sync::mpsc::Receiver<String>) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();
    let (tx, rx) = std::sync::mpsc::channel();

    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let listener = TcpListener::from_std(listener).unwrap();
            serve_collector(listener, move |text| {
                let _ = tx.send(text);
            })
            .await;
        });
    });

    (format!("ws://{}", addr), rx)
}
