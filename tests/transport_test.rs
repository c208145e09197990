use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use wiremux::network::Frame;
use wiremux::{AppError, ConnId, Dialer, LinkId, Listener, TransportConfig};

async fn listener() -> (Listener, String) {
    let listener = Listener::bind("127.0.0.1:0", TransportConfig::default())
        .await
        .unwrap();
    let addr = listener.local_addr().to_string();
    (listener, addr)
}

#[tokio::test]
async fn single_conn_echo() {
    let (listener, addr) = listener().await;
    let dialer = Dialer::new(TransportConfig::default());

    let link = dialer.dial(addr.as_str()).await.unwrap();
    let conn = link.open().await.unwrap();
    conn.write(Bytes::from_static(b"hello")).await.unwrap();

    let server_conn = listener.accept().await.unwrap();
    assert_eq!(server_conn.read().await.unwrap(), Bytes::from_static(b"hello"));

    server_conn.write(Bytes::from_static(b"world")).await.unwrap();
    assert_eq!(conn.read().await.unwrap(), Bytes::from_static(b"world"));

    conn.close().await;
    server_conn.close().await;
    assert!(matches!(conn.read().await, Err(AppError::Closed)));
    assert!(matches!(server_conn.read().await, Err(AppError::Closed)));
}

#[tokio::test]
async fn multiplexed_conns_do_not_cross_mix() {
    let (listener, addr) = listener().await;
    let dialer = Dialer::new(TransportConfig::default());
    let link = dialer.dial(addr.as_str()).await.unwrap();

    // conns arrive at the peer in open order over one link
    let mut client_conns = Vec::new();
    for _ in 0..3 {
        client_conns.push(link.open().await.unwrap());
    }
    let mut server_conns = Vec::new();
    for _ in 0..3 {
        server_conns.push(listener.accept().await.unwrap());
    }

    // interleave the writes across the three conns
    for round in 0..3 {
        for (i, conn) in client_conns.iter().enumerate() {
            let payload = format!("p{}-{}", i, round);
            conn.write(Bytes::from(payload)).await.unwrap();
        }
    }

    for (i, conn) in server_conns.iter().enumerate() {
        for round in 0..3 {
            let expected = format!("p{}-{}", i, round);
            assert_eq!(conn.read().await.unwrap(), Bytes::from(expected));
        }
    }
}

#[tokio::test]
async fn accept_backpressure_loses_nothing() {
    let (listener, addr) = listener().await;
    let dialer = Dialer::new(TransportConfig::default());
    let link = dialer.dial(addr.as_str()).await.unwrap();

    // more opens than the accept fan-in channel holds; the server read loop
    // blocks once the channel is full and resumes as accepts drain it
    const CONNS: usize = 250;
    let mut client_conns = Vec::new();
    for i in 0..CONNS {
        let conn = link.open().await.unwrap();
        conn.write(Bytes::from(format!("payload-{}", i))).await.unwrap();
        client_conns.push(conn);
    }

    let mut server_conns = Vec::new();
    for _ in 0..CONNS {
        server_conns.push(listener.accept().await.unwrap());
    }
    for (i, conn) in server_conns.iter().enumerate() {
        assert_eq!(conn.read().await.unwrap(), Bytes::from(format!("payload-{}", i)));
    }
}

#[tokio::test]
async fn link_close_cascades_to_all_conns() {
    let (listener, addr) = listener().await;
    let dialer = Dialer::new(TransportConfig::default());
    let link = dialer.dial(addr.as_str()).await.unwrap();

    let conn = link.open().await.unwrap();
    conn.write(Bytes::from_static(b"ping")).await.unwrap();
    let server_conn = listener.accept().await.unwrap();
    assert_eq!(server_conn.read().await.unwrap(), Bytes::from_static(b"ping"));

    // a read blocked mid-flight must be released by the cascade
    let blocked = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.read().await })
    };

    listener.shutdown().await;

    let result = blocked.await.unwrap();
    assert!(matches!(result, Err(AppError::Closed)));
    assert!(link.is_closed());
    assert!(matches!(
        conn.write(Bytes::from_static(b"after")).await,
        Err(AppError::Closed)
    ));
    assert!(matches!(link.open().await, Err(AppError::Closed)));
}

#[tokio::test]
async fn unknown_tags_are_skipped_mid_session() {
    let (listener, addr) = listener().await;

    // raw peer: handshake by hand, then interleave an alien frame
    let mut socket = TcpStream::connect(addr.as_str()).await.unwrap();
    let mut handshake = BytesMut::new();
    Frame::Dial { from_id: LinkId::mint() }.encode(&mut handshake);
    socket.write_all(&handshake).await.unwrap();
    let mut accept_reply = [0u8; 5];
    socket.read_exact(&mut accept_reply).await.unwrap();
    assert_eq!(accept_reply, [0x00, 0x00, 0x00, 0x01, 0x02]);

    let id = ConnId::from_u64(77);
    let mut frames = BytesMut::new();
    Frame::Open { id }.encode(&mut frames);
    // alien tag 0xfe with a 7-byte body
    frames.extend_from_slice(&[0x00, 0x00, 0x00, 0x08, 0xfe]);
    frames.extend_from_slice(&[0u8; 7]);
    Frame::Conn { id, payload: Bytes::from_static(b"still here") }.encode(&mut frames);
    socket.write_all(&frames).await.unwrap();

    let server_conn = listener.accept().await.unwrap();
    assert_eq!(server_conn.read().await.unwrap(), Bytes::from_static(b"still here"));
}

#[tokio::test]
async fn dialing_twice_shares_one_link() {
    let (_listener, addr) = listener().await;
    let dialer = Dialer::new(TransportConfig::default());

    let first = dialer.dial(addr.as_str()).await.unwrap();
    let second = dialer.dial(addr.as_str()).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn listener_side_opens_reach_the_dialer() {
    let (listener, addr) = listener().await;
    let dialer = Dialer::new(TransportConfig::default());
    let link = dialer.dial(addr.as_str()).await.unwrap();

    // establish the link server-side with one client-opened conn
    let probe = link.open().await.unwrap();
    probe.write(Bytes::from_static(b"probe")).await.unwrap();
    let server_probe = listener.accept().await.unwrap();
    assert_eq!(server_probe.read().await.unwrap(), Bytes::from_static(b"probe"));

    // the peer opens a conn back over the same link
    let server_link = server_probe.link().unwrap();
    let server_conn = server_link.open().await.unwrap();
    server_conn.write(Bytes::from_static(b"reverse")).await.unwrap();

    let client_conn = dialer.accept().await.unwrap();
    assert_eq!(client_conn.read().await.unwrap(), Bytes::from_static(b"reverse"));
}

#[tokio::test]
async fn conn_close_is_idempotent_and_peer_side_ends() {
    let (listener, addr) = listener().await;
    let dialer = Dialer::new(TransportConfig::default());
    let link = dialer.dial(addr.as_str()).await.unwrap();

    let conn = link.open().await.unwrap();
    conn.write(Bytes::from_static(b"bye")).await.unwrap();
    let server_conn = listener.accept().await.unwrap();
    assert_eq!(server_conn.read().await.unwrap(), Bytes::from_static(b"bye"));

    conn.close().await;
    conn.close().await;
    assert!(matches!(conn.read().await, Err(AppError::Closed)));
    assert!(matches!(
        conn.write(Bytes::from_static(b"late")).await,
        Err(AppError::Closed)
    ));

    // the close frame shuts the peer conn without echoing another close
    assert!(matches!(server_conn.read().await, Err(AppError::Closed)));
    assert!(!link.is_closed());
}
