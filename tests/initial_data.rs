use std::net::IpAddr;
use std::thread;

use cotp::{dial_with, CotpListener, DialOpts, TsapAddr};

fn loopback(tsel: &[u8]) -> TsapAddr {
    TsapAddr::new(IpAddr::from([127, 0, 0, 1]), tsel)
        .unwrap()
        .with_port(0)
}

fn dial_opts(initial_data: Vec<u8>) -> DialOpts {
    DialOpts {
        initial_data,
        ..DialOpts::default()
    }
}

#[test]
fn initial_data_reaches_the_first_read() {
    let listener = CotpListener::bind("cotp", &loopback(b"100")).unwrap();
    let addr = listener.local_addr().clone();

    let server = thread::spawn(move || {
        let mut conn = listener.accept_with(|data| data.to_vec()).unwrap();

        assert!(!conn.expedited_available());

        let mut buf = [0u8; 100];
        let recv = conn.recv(&mut buf).unwrap();

        assert_eq!(recv.len, 5);
        assert_eq!(&buf[..5], b"\x01\xff\x66\x93\x20");
        assert!(recv.end_of_tsdu);
        assert!(!recv.expedited);
    });

    let data = vec![0x01, 0xff, 0x66, 0x93, 0x20];
    let conn = dial_with("cotp", None, &addr, dial_opts(data)).unwrap();

    assert!(!conn.expedited_available());

    server.join().unwrap();
}

#[test]
fn initial_data_is_truncated_to_capacity() {
    let listener = CotpListener::bind("cotp", &loopback(b"100")).unwrap();
    let addr = listener.local_addr().clone();

    let server = thread::spawn(move || {
        let mut conn = listener.accept_with(|data| data.to_vec()).unwrap();

        let mut buf = [0u8; 100];
        let recv = conn.recv(&mut buf).unwrap();

        assert_eq!(recv.len, 32);
        assert_eq!(&buf[..32], &[0u8; 32]);
    });

    // 35 bytes of initial data, three more than a CR can carry; the
    // overflow is dropped without an error.
    let conn = dial_with("cotp", None, &addr, dial_opts(vec![0u8; 35])).unwrap();

    assert_eq!(conn.max_initial_data(), 32);

    server.join().unwrap();
}

#[test]
fn plain_accept_uses_the_identity() {
    let listener = CotpListener::bind("cotp", &loopback(b"100")).unwrap();
    let addr = listener.local_addr().clone();

    let server = thread::spawn(move || {
        let mut conn = listener.accept().unwrap();

        let mut buf = [0u8; 100];
        let recv = conn.recv(&mut buf).unwrap();

        assert_eq!(recv.len, 5);
        assert_eq!(&buf[..5], b"\x01\xff\x66\x93\x20");
        assert!(recv.end_of_tsdu);
    });

    let data = vec![0x01, 0xff, 0x66, 0x93, 0x20];

    dial_with("cotp", None, &addr, dial_opts(data)).unwrap();

    server.join().unwrap();
}

#[test]
fn accept_transform_shapes_the_first_read() {
    let listener = CotpListener::bind("cotp", &loopback(b"100")).unwrap();
    let addr = listener.local_addr().clone();

    let server = thread::spawn(move || {
        let mut conn = listener
            .accept_with(|data| data.iter().rev().copied().collect())
            .unwrap();

        let mut buf = [0u8; 100];
        let recv = conn.recv(&mut buf).unwrap();

        assert_eq!(&buf[..recv.len], b"cba");
    });

    dial_with("cotp", None, &addr, dial_opts(b"abc".to_vec())).unwrap();

    server.join().unwrap();
}

#[test]
fn without_initial_data_the_first_read_blocks_for_a_dt() {
    let listener = CotpListener::bind("cotp", &loopback(b"100")).unwrap();
    let addr = listener.local_addr().clone();

    let server = thread::spawn(move || {
        let mut conn = listener.accept().unwrap();

        let mut buf = [0u8; 100];
        let recv = conn.recv(&mut buf).unwrap();

        assert_eq!(&buf[..recv.len], b"later");
    });

    let mut conn = dial_with("cotp", None, &addr, DialOpts::default()).unwrap();

    conn.send(b"later").unwrap();

    server.join().unwrap();
}
