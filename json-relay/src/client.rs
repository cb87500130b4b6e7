use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::{
    io::{
        self, AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader,
    },
    net::TcpStream,
    select,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message},
};
use tracing::{info, warn};

use crate::cli::ClientArgs;

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub async fn run(args: ClientArgs) -> Result<()> {
    let mut ws = establish_connection(&args).await?;

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    run_client_loop(&mut ws, &mut stdin, &mut input).await?;
    shutdown_connection(&mut ws).await;

    Ok(())
}

async fn establish_connection(args: &ClientArgs) -> Result<ClientStream> {
    let (ws, _response) = connect_async(args.server.as_str())
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);
    Ok(ws)
}

/// `read_line` may be cancelled by another branch with part of a line already
/// in `input`; the buffer is only cleared once a whole line has been handled.
async fn run_client_loop<S, R>(
    ws: &mut WebSocketStream<S>,
    stdin: &mut R,
    input: &mut String,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AsyncBufRead + Unpin,
{
    loop {
        select! {
            server_message = ws.next() => {
                if !handle_server_message(server_message).await? {
                    break;
                }
            }
            bytes_read = stdin.read_line(input) => {
                let keep_going = handle_stdin_input(bytes_read, input, ws).await?;
                input.clear();
                if !keep_going {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_message(
    message: Option<Result<Message, tungstenite::Error>>,
) -> Result<bool> {
    match message {
        Some(Ok(Message::Text(text))) => {
            write_stdout(text.as_str()).await?;
            Ok(true)
        }
        Some(Ok(Message::Close(_))) | None => {
            write_stderr("*** relay closed the connection").await?;
            Ok(false)
        }
        Some(Ok(_)) => Ok(true),
        Some(Err(err)) => Err(err).context("relay connection failed"),
    }
}

async fn handle_stdin_input<S>(
    bytes_read: io::Result<usize>,
    input: &str,
    ws: &mut WebSocketStream<S>,
) -> Result<bool>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let bytes_read = bytes_read?;
    if bytes_read == 0 {
        return Ok(false);
    }

    let text = input.trim_end_matches(['\r', '\n']);
    if text.trim().is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case("/quit") {
        write_stderr("*** leaving relay").await?;
        return Ok(false);
    }

    ws.send(Message::text(text.to_string()))
        .await
        .context("failed to send line to relay")?;
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(ws: &mut ClientStream) {
    if let Err(error) = ws.close(None).await {
        warn!(?error, "failed to close relay connection cleanly");
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
