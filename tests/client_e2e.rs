//! End-to-end client tests against an in-process fake server.
//!
//! Each test binds a local listener, scripts the server side of the
//! conversation, and asserts on both the lines the client sends and
//! the events it delivers.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::LocalSet;
use tokio::time::timeout;

use slirc_client::sasl::encode_plain;
use slirc_client::{Client, Config, Event};

const STEP: Duration = Duration::from_secs(5);

struct ServerConn {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl ServerConn {
    async fn accept(listener: &TcpListener) -> ServerConn {
        let (stream, _) = timeout(STEP, listener.accept()).await.unwrap().unwrap();
        let (read, write) = stream.into_split();
        ServerConn {
            reader: BufReader::new(read),
            writer: write,
        }
    }

    async fn recv(&mut self) -> String {
        let mut line = String::new();
        timeout(STEP, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a client line")
            .unwrap();
        line.trim_end().to_string()
    }

    async fn expect(&mut self, wanted: &str) {
        let line = self.recv().await;
        assert_eq!(line, wanted);
    }

    async fn send(&mut self, line: &str) {
        let framed = format!("{}\r\n", line);
        timeout(STEP, self.writer.write_all(framed.as_bytes()))
            .await
            .unwrap()
            .unwrap();
    }
}

async fn next_event(events: &mut UnboundedReceiver<Event>) -> Event {
    timeout(STEP, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Wait for a specific event, skipping others.
async fn wait_for(events: &mut UnboundedReceiver<Event>, pred: impl Fn(&Event) -> bool) -> Event {
    loop {
        let event = next_event(events).await;
        if pred(&event) {
            return event;
        }
    }
}

fn test_config(port: u16, nickname: &str) -> Config {
    let mut config = Config::new("127.0.0.1", nickname);
    config.port = port;
    config
}

#[tokio::test(flavor = "current_thread")]
async fn test_basic_registration_join_and_chat() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();

            let config = test_config(port, "MyBot");
            let features = config.default_features().unwrap();
            let (client, mut events) = Client::connect(config, features);

            let mut server = ServerConn::accept(&listener).await;
            server.expect("CAP LS 302").await;
            server.send("CAP * LS :").await;
            server.expect("CAP END").await;
            server.expect("NICK MyBot").await;
            server.expect("USER MyBot 0 * MyBot").await;
            server.send(":srv 001 MyBot :Welcome to the test network").await;

            let event = wait_for(&mut events, |e| matches!(e, Event::Connect)).await;
            assert_eq!(event, Event::Connect);

            client.join("#test", None).await.unwrap();
            server.expect("JOIN #test").await;
            server.send(":MyBot!u@h JOIN #test").await;
            server.send(":srv 353 MyBot = #test :MyBot @oper").await;
            server.send(":srv 366 MyBot #test :End of /NAMES list").await;

            let event = wait_for(&mut events, |e| matches!(e, Event::Join { .. })).await;
            assert_eq!(
                event,
                Event::Join {
                    channel: "#test".into(),
                    who: "MyBot".into()
                }
            );

            // Joining again fails the precondition locally.
            let err = client.join("#test", None).await.unwrap_err();
            assert!(matches!(
                err,
                slirc_client::ClientError::AlreadyInChannel(_)
            ));

            client.privmsg("#test", "hello there").unwrap();
            server.expect("PRIVMSG #test :hello there").await;

            server.send(":oper!o@h PRIVMSG #test :hi MyBot").await;
            let event =
                wait_for(&mut events, |e| matches!(e, Event::ChannelMessage { .. })).await;
            assert_eq!(
                event,
                Event::ChannelMessage {
                    channel: "#test".into(),
                    by: "oper".into(),
                    text: "hi MyBot".into()
                }
            );

            client.quit(Some("bye".into())).unwrap();
            server.expect("QUIT bye").await;
            let event = wait_for(&mut events, |e| matches!(e, Event::Disconnect { .. })).await;
            assert_eq!(event, Event::Disconnect { expected: true });
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_sasl_plain_authentication() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();

            let mut config = test_config(port, "MyBot");
            config.sasl_username = Some("user".into());
            config.sasl_password = Some("pass".into());
            let features = config.default_features().unwrap();
            let (client, mut events) = Client::connect(config, features);

            let mut server = ServerConn::accept(&listener).await;
            server.expect("CAP LS 302").await;
            server.send(":srv CAP * LS :multi-prefix sasl=PLAIN,EXTERNAL").await;
            server.expect("CAP REQ :multi-prefix sasl").await;
            server.send(":srv CAP MyBot ACK :multi-prefix sasl").await;

            server.expect("AUTHENTICATE PLAIN").await;
            server.send("AUTHENTICATE +").await;
            let expected_payload = format!("AUTHENTICATE {}", encode_plain("user", "pass"));
            server.expect(&expected_payload).await;
            server
                .send(":srv 903 MyBot :SASL authentication successful")
                .await;

            server.expect("CAP END").await;
            server.expect("NICK MyBot").await;
            server.expect("USER MyBot 0 * MyBot").await;
            server.send(":srv 001 MyBot :Welcome").await;

            let event = wait_for(&mut events, |e| {
                matches!(e, Event::CapEnabled { name } if name == "sasl")
            })
            .await;
            assert_eq!(
                event,
                Event::CapEnabled {
                    name: "sasl".into()
                }
            );
            wait_for(&mut events, |e| matches!(e, Event::Connect)).await;

            client.quit(None).unwrap();
            server.expect("QUIT").await;
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_nickname_collision_fallbacks() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();

            let mut config = test_config(port, "MyBot");
            config.fallback_nicknames = vec!["MyBot_".into(), "MyBotX".into()];
            let features = config.default_features().unwrap();
            let (client, mut events) = Client::connect(config, features);

            let mut server = ServerConn::accept(&listener).await;
            server.expect("CAP LS 302").await;
            server.send("CAP * LS :").await;
            server.expect("CAP END").await;
            server.expect("NICK MyBot").await;
            server.expect("USER MyBot 0 * MyBot").await;

            server
                .send(":srv 433 * MyBot :Nickname is already in use")
                .await;
            server.expect("NICK MyBot_").await;
            server
                .send(":srv 433 * MyBot_ :Nickname is already in use")
                .await;
            server.expect("NICK MyBotX").await;
            server.send(":srv 001 MyBotX :Welcome").await;

            wait_for(&mut events, |e| matches!(e, Event::Connect)).await;

            client.quit(None).unwrap();
            server.expect("QUIT").await;
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_whois_round_trip() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();

            let config = test_config(port, "MyBot");
            let features = config.default_features().unwrap();
            let (client, mut events) = Client::connect(config, features);

            let mut server = ServerConn::accept(&listener).await;
            server.expect("CAP LS 302").await;
            server.send("CAP * LS :").await;
            server.expect("CAP END").await;
            server.expect("NICK MyBot").await;
            server.expect("USER MyBot 0 * MyBot").await;
            server.send(":srv 001 MyBot :Welcome").await;
            wait_for(&mut events, |e| matches!(e, Event::Connect)).await;

            let whois_task = tokio::task::spawn_local({
                let client = client.clone();
                async move { client.whois("Target").await }
            });

            server.expect("WHOIS Target").await;
            server
                .send(":srv 311 MyBot Target ident some.host * :Real Name")
                .await;
            server.send(":srv 319 MyBot Target :@#a #b").await;
            server.send(":srv 318 MyBot Target :End of /WHOIS list").await;

            let info = timeout(STEP, whois_task).await.unwrap().unwrap().unwrap();
            assert_eq!(info.nickname, "Target");
            assert_eq!(info.username.as_deref(), Some("ident"));
            assert_eq!(info.hostname.as_deref(), Some("some.host"));
            assert_eq!(info.realname.as_deref(), Some("Real Name"));
            assert_eq!(info.channels, vec!["@#a", "#b"]);

            client.quit(None).unwrap();
            server.expect("QUIT").await;
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_reconnect_after_connection_loss() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();

            let config = test_config(port, "MyBot");
            let features = config.default_features().unwrap();
            let (client, mut events) = Client::connect(config, features);

            let mut server = ServerConn::accept(&listener).await;
            server.expect("CAP LS 302").await;
            server.send("CAP * LS :").await;
            server.expect("CAP END").await;
            server.expect("NICK MyBot").await;
            server.expect("USER MyBot 0 * MyBot").await;
            server.send(":srv 001 MyBot :Welcome").await;
            wait_for(&mut events, |e| matches!(e, Event::Connect)).await;

            // Server drops the connection; the client backs off (about
            // five seconds) and reconnects from scratch.
            drop(server);
            let event = wait_for(&mut events, |e| matches!(e, Event::Disconnect { .. })).await;
            assert_eq!(event, Event::Disconnect { expected: false });

            let (stream, _) = timeout(Duration::from_secs(15), listener.accept())
                .await
                .expect("client did not reconnect")
                .unwrap();
            let (read, write) = stream.into_split();
            let mut server = ServerConn {
                reader: BufReader::new(read),
                writer: write,
            };
            server.expect("CAP LS 302").await;

            client.quit(None).unwrap();
            server.expect("QUIT").await;
            let event = wait_for(&mut events, |e| matches!(e, Event::Disconnect { .. })).await;
            assert_eq!(event, Event::Disconnect { expected: true });
        })
        .await;
}
