use std::io::{Read, Write};
use std::net::IpAddr;
use std::thread;
use std::time::{Duration, Instant};

use cotp::{dial, dial_with, CotpListener, DialOpts, Error, TsapAddr};

fn loopback(tsel: &[u8]) -> TsapAddr {
    TsapAddr::new(IpAddr::from([127, 0, 0, 1]), tsel)
        .unwrap()
        .with_port(0)
}

#[test]
fn single_dt_round_trip() {
    let listener = CotpListener::bind("cotp", &loopback(b"100")).unwrap();
    let addr = listener.local_addr().clone();

    let server = thread::spawn(move || {
        let mut conn = listener.accept().unwrap();

        let mut buf = [0u8; 128];
        let recv = conn.recv(&mut buf).unwrap();

        assert_eq!(recv.len, 5);
        assert!(recv.end_of_tsdu);
        assert!(!recv.expedited);
        assert_eq!(&buf[..5], b"hello");
    });

    let mut conn = dial("cotp", &addr).unwrap();

    assert_eq!(conn.send(b"hello").unwrap(), 5);

    server.join().unwrap();
}

#[test]
fn fragmented_write_reassembles() {
    let listener = CotpListener::bind("cotp", &loopback(b"100")).unwrap();
    let addr = listener.local_addr().clone();

    let payload: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
    let expected = payload.clone();

    let server = thread::spawn(move || {
        let mut conn = listener.accept().unwrap();

        let mut out = Vec::new();
        let mut buf = [0u8; 100];
        let mut ends = 0;

        while out.len() < expected.len() {
            let recv = conn.recv(&mut buf).unwrap();

            out.extend_from_slice(&buf[..recv.len]);

            if recv.end_of_tsdu {
                ends += 1;

                assert_eq!(out.len(), expected.len());
            }

            assert!(!recv.expedited);
        }

        assert_eq!(out, expected);
        assert_eq!(ends, 1);
    });

    let opts = DialOpts {
        max_tpdu_size: Some(2048),
        ..DialOpts::default()
    };

    let mut conn = dial_with("cotp", None, &addr, opts).unwrap();

    assert_eq!(conn.send(&payload).unwrap(), payload.len());

    server.join().unwrap();
}

#[test]
fn partial_read_buffers_the_tail() {
    let listener = CotpListener::bind("cotp", &loopback(b"100")).unwrap();
    let addr = listener.local_addr().clone();

    let server = thread::spawn(move || {
        let mut conn = listener.accept().unwrap();

        let mut buf = [0u8; 3];

        let first = conn.recv(&mut buf).unwrap();

        assert_eq!(first.len, 3);
        assert!(!first.end_of_tsdu);
        assert_eq!(&buf[..3], b"hel");

        let second = conn.recv(&mut buf).unwrap();

        assert_eq!(second.len, 2);
        assert!(second.end_of_tsdu);
        assert_eq!(&buf[..2], b"lo");
    });

    let mut conn = dial("cotp", &addr).unwrap();

    conn.send(b"hello").unwrap();

    server.join().unwrap();
}

#[test]
fn empty_write_is_a_whole_tsdu() {
    let listener = CotpListener::bind("cotp", &loopback(b"100")).unwrap();
    let addr = listener.local_addr().clone();

    let server = thread::spawn(move || {
        let mut conn = listener.accept().unwrap();

        let mut buf = [0u8; 16];
        let recv = conn.recv(&mut buf).unwrap();

        assert_eq!(recv.len, 0);
        assert!(recv.end_of_tsdu);
    });

    let mut conn = dial("cotp", &addr).unwrap();

    assert_eq!(conn.send(b"").unwrap(), 0);

    server.join().unwrap();
}

#[test]
fn recv_rejects_empty_buffer() {
    let listener = CotpListener::bind("cotp", &loopback(b"100")).unwrap();
    let addr = listener.local_addr().clone();

    let server = thread::spawn(move || {
        listener.accept().unwrap()
    });

    let mut conn = dial("cotp", &addr).unwrap();
    let mut server_conn = server.join().unwrap();

    assert!(matches!(conn.recv(&mut []), Err(Error::InvalidInput)));

    server_conn.close().unwrap();
    conn.close().unwrap();
}

#[test]
fn generic_stream_surface() {
    let listener = CotpListener::bind("cotp", &loopback(b"100")).unwrap();
    let addr = listener.local_addr().clone();

    let server = thread::spawn(move || {
        let mut conn = listener.accept().unwrap();

        let mut buf = [0u8; 32];
        let n = conn.read(&mut buf).unwrap();

        assert_eq!(&buf[..n], b"ping");

        conn.write_all(b"pong").unwrap();
        conn.flush().unwrap();
    });

    let mut conn = dial("cotp", &addr).unwrap();

    assert_eq!(conn.write(b"ping").unwrap(), 4);

    let mut buf = [0u8; 32];
    let n = conn.read(&mut buf).unwrap();

    assert_eq!(&buf[..n], b"pong");

    server.join().unwrap();
}

#[test]
fn read_after_close_fails() {
    let listener = CotpListener::bind("cotp", &loopback(b"100")).unwrap();
    let addr = listener.local_addr().clone();

    let server = thread::spawn(move || {
        listener.accept().unwrap()
    });

    let mut conn = dial("cotp", &addr).unwrap();
    let _server_conn = server.join().unwrap();

    conn.close().unwrap();

    let mut buf = [0u8; 16];

    assert!(matches!(conn.recv(&mut buf), Err(Error::Transport(_))));
    assert!(matches!(conn.send(b"x"), Err(Error::Transport(_))));
}

#[test]
fn elapsed_read_deadline_leaves_the_connection_usable() {
    let listener = CotpListener::bind("cotp", &loopback(b"100")).unwrap();
    let addr = listener.local_addr().clone();

    let server = thread::spawn(move || {
        listener.accept().unwrap()
    });

    let mut conn = dial("cotp", &addr).unwrap();
    let mut server_conn = server.join().unwrap();

    conn.set_read_deadline(Some(Instant::now()));

    let mut buf = [0u8; 16];

    assert!(matches!(conn.recv(&mut buf), Err(Error::Transport(_))));

    // The timeout aborts the read without touching connection state.
    conn.set_read_deadline(None);

    server_conn.send(b"late").unwrap();

    let recv = conn.recv(&mut buf).unwrap();

    assert_eq!(&buf[..recv.len], b"late");
}

#[test]
fn pending_read_deadline_fires() {
    let listener = CotpListener::bind("cotp", &loopback(b"100")).unwrap();
    let addr = listener.local_addr().clone();

    let server = thread::spawn(move || {
        listener.accept().unwrap()
    });

    let mut conn = dial("cotp", &addr).unwrap();
    let _server_conn = server.join().unwrap();

    conn.set_read_deadline(Some(Instant::now() + Duration::from_millis(50)));

    let started = Instant::now();
    let mut buf = [0u8; 16];

    assert!(matches!(conn.recv(&mut buf), Err(Error::Transport(_))));
    assert!(started.elapsed() >= Duration::from_millis(40));
}

#[test]
fn peer_close_surfaces_as_transport_error() {
    let listener = CotpListener::bind("cotp", &loopback(b"100")).unwrap();
    let addr = listener.local_addr().clone();

    let server = thread::spawn(move || {
        let mut conn = listener.accept().unwrap();

        conn.close().unwrap();
    });

    let mut conn = dial("cotp", &addr).unwrap();

    server.join().unwrap();

    let mut buf = [0u8; 16];

    assert!(matches!(conn.recv(&mut buf), Err(Error::Transport(_))));
}
