//! Interactive shell for the client API gateway.

use std::process::ExitCode;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use chord_dht::cli::ClientArgs;
use chord_dht::gateway::{DHT_FAILURE, DHT_GET, DHT_PUT, DHT_SUCCESS};

const KEY_LEN: usize = 32;
const HELP: &str = "commands:\n  get <key>\n  put <key> <value> <ttl_seconds> <replication>\n  help\n  exit";

#[tokio::main]
async fn main() -> ExitCode {
    let args = ClientArgs::parse();
    println!("connected to {}", args.addr);
    println!("{}", HELP);

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut line = String::new();

    loop {
        print!("> ");
        if let Err(err) = tokio::io::stdout().flush().await {
            eprintln!("stdout error: {}", err);
            return ExitCode::FAILURE;
        }

        line.clear();
        let bytes_read = match stdin.read_line(&mut line).await {
            Ok(n) => n,
            Err(err) => {
                eprintln!("stdin error: {}", err);
                return ExitCode::FAILURE;
            }
        };
        if bytes_read == 0 {
            return ExitCode::SUCCESS;
        }

        let parts: Vec<&str> = line.trim().split_whitespace().collect();
        match parts.as_slice() {
            [] => continue,
            ["help"] => println!("{}", HELP),
            ["exit"] => return ExitCode::SUCCESS,
            ["get", key] => {
                if let Err(err) = run_get(&args.addr, key).await {
                    eprintln!("get failed: {}", err);
                }
            }
            ["put", key, value, ttl, replication] => {
                if let Err(err) = run_put(&args.addr, key, value.as_bytes(), ttl, replication).await {
                    eprintln!("put failed: {}", err);
                }
            }
            _ => println!("unrecognized command; {}", HELP),
        }
    }
}

fn pad_key(key: &str) -> Result<[u8; KEY_LEN], String> {
    let bytes = key.as_bytes();
    if bytes.len() > KEY_LEN {
        return Err(format!("key longer than {} bytes", KEY_LEN));
    }
    let mut padded = [0u8; KEY_LEN];
    padded[..bytes.len()].copy_from_slice(bytes);
    Ok(padded)
}

async fn run_get(addr: &str, key: &str) -> Result<(), String> {
    let padded = pad_key(key)?;
    let mut stream = TcpStream::connect(addr).await.map_err(|e| e.to_string())?;
    write_frame(&mut stream, DHT_GET, &padded).await?;

    let (msg_type, body) = read_frame(&mut stream).await?;
    match msg_type {
        DHT_SUCCESS => {
            let value = &body[KEY_LEN..];
            println!("{}", String::from_utf8_lossy(value));
        }
        DHT_FAILURE => println!("(not found)"),
        other => return Err(format!("unexpected response type {}", other)),
    }
    Ok(())
}

async fn run_put(addr: &str, key: &str, value: &[u8], ttl: &str, replication: &str) -> Result<(), String> {
    let padded = pad_key(key)?;
    let ttl_seconds: u16 = ttl.parse().map_err(|_| "ttl must be a u16".to_string())?;
    let replication: u8 = replication.parse().map_err(|_| "replication must be a u8".to_string())?;

    let mut body = Vec::with_capacity(4 + KEY_LEN + value.len());
    body.extend_from_slice(&ttl_seconds.to_be_bytes());
    body.push(replication);
    body.push(0); // reserved
    body.extend_from_slice(&padded);
    body.extend_from_slice(value);

    let mut stream = TcpStream::connect(addr).await.map_err(|e| e.to_string())?;
    write_frame(&mut stream, DHT_PUT, &body).await?;
    println!("ok");
    Ok(())
}

async fn write_frame(stream: &mut TcpStream, msg_type: u16, body: &[u8]) -> Result<(), String> {
    let size = (4 + body.len()) as u16;
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&size.to_be_bytes());
    frame.extend_from_slice(&msg_type.to_be_bytes());
    frame.extend_from_slice(body);
    stream.write_all(&frame).await.map_err(|e| e.to_string())
}

async fn read_frame(stream: &mut TcpStream) -> Result<(u16, Vec<u8>), String> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.map_err(|e| e.to_string())?;
    let size = u16::from_be_bytes([header[0], header[1]]) as usize;
    let msg_type = u16::from_be_bytes([header[2], header[3]]);
    let mut body = vec![0u8; size - 4];
    stream.read_exact(&mut body).await.map_err(|e| e.to_string())?;
    Ok((msg_type, body))
}
