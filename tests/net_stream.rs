use muxer::net::StreamTransport;
use muxer::{BufferedSocket, Multiplexer, SharedTransport, Transport};

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

fn share(transport: StreamTransport) -> SharedTransport {
    Rc::new(RefCell::new(transport))
}

#[test]
fn pair_is_full_duplex() {
    let (mut a, mut b) = StreamTransport::pair().expect("socketpair");
    a.set_nonblocking(true).expect("nonblocking");
    b.set_nonblocking(true).expect("nonblocking");

    a.send(b"ping").expect("send");
    assert_eq!(b.recv().expect("recv"), b"ping".to_vec());

    b.send(b"pong").expect("send");
    assert_eq!(a.recv().expect("recv"), b"pong".to_vec());

    a.close();
    assert!(!a.is_open());
    a.close(); // idempotent

    assert!(b.recv().expect("recv").is_empty());
    assert!(b.is_eof());
}

#[test]
fn recv_on_closed_transport_fails() {
    let (mut a, _b) = StreamTransport::pair().expect("socketpair");

    a.close();
    assert!(a.recv().is_err());
    assert!(a.send(b"x").is_err());
}

#[test]
fn listen_rejects_unresolvable_address() {
    assert!(StreamTransport::listen("definitely not an address").is_err());
}

#[test]
fn second_listener_on_same_port_fails() {
    let first = StreamTransport::listen("127.0.0.1:0").expect("listen");
    let addr = first.local_addr().expect("local addr");

    assert!(StreamTransport::listen(&addr.to_string()).is_err());
}

#[test]
fn accepted_peer_matches_connecting_client() {
    let mux = Multiplexer::new();

    let master = StreamTransport::listen("127.0.0.1:0").expect("listen");
    let addr = master.local_addr().expect("local addr");
    let master = share(master);

    let accepted: Rc<RefCell<Option<StreamTransport>>> = Rc::new(RefCell::new(None));
    let slot = accepted.clone();
    mux.attach_read(
        master,
        Box::new(move |master, _| {
            let stream = StreamTransport::accept(&*master.borrow()).expect("accept");
            *slot.borrow_mut() = Some(stream);
        }),
    );

    let client = StreamTransport::connect(&addr.to_string()).expect("connect");

    let deadline = Instant::now() + Duration::from_secs(5);
    while accepted.borrow().is_none() && Instant::now() < deadline {
        mux.dispatch(Some(Duration::from_millis(10))).expect("dispatch");
    }

    let accepted = accepted.borrow_mut().take().expect("accepted in time");
    assert_eq!(
        accepted.peer_addr().expect("peer addr").port(),
        client.local_addr().expect("local addr").port()
    );
    assert_eq!(accepted.local_addr().expect("local addr").port(), addr.port());
}

#[test]
fn tcp_greeting_end_to_end() {
    let mux = Rc::new(Multiplexer::new());

    let master = StreamTransport::listen("127.0.0.1:0").expect("listen");
    let addr = master.local_addr().expect("local addr");
    let master = share(master);

    let server_seen: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    let client_seen: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    let server_slot: Rc<RefCell<Option<BufferedSocket>>> = Rc::new(RefCell::new(None));
    let client_slot: Rc<RefCell<Option<BufferedSocket>>> = Rc::new(RefCell::new(None));

    // server side: greet on accept, answer HELLO with WELCOME
    let mux_handle = Rc::downgrade(&mux);
    let slot = server_slot.clone();
    let seen = server_seen.clone();
    mux.attach_read(
        master,
        Box::new(move |master, _| {
            let Some(mux) = mux_handle.upgrade() else {
                return;
            };
            let stream = StreamTransport::accept(&*master.borrow()).expect("accept");
            let socket = BufferedSocket::new(share(stream), &mux).expect("server socket");

            let writer = socket.clone();
            let seen = seen.clone();
            let greeted = Cell::new(false);
            socket.on_input(move |data| {
                seen.borrow_mut().extend_from_slice(data);
                if !greeted.get() && seen.borrow().windows(6).any(|w| w == b"HELLO\n") {
                    greeted.set(true);
                    writer.write(b"WELCOME\n");
                }
            });
            socket.write(b"HELLO\n");

            *slot.borrow_mut() = Some(socket);
        }),
    );

    // client side: the pending connect completes as write-readiness
    let client = share(StreamTransport::connect(&addr.to_string()).expect("connect"));
    let mux_handle = Rc::downgrade(&mux);
    let slot = client_slot.clone();
    let seen = client_seen.clone();
    mux.attach_write(
        client.clone(),
        Box::new(move |transport, mux_ref| {
            mux_ref.detach_write(transport.borrow().id());

            let Some(mux) = mux_handle.upgrade() else {
                return;
            };
            let socket = BufferedSocket::new(transport.clone(), &mux).expect("client socket");

            let writer = socket.clone();
            let seen = seen.clone();
            let replied = Cell::new(false);
            socket.on_input(move |data| {
                seen.borrow_mut().extend_from_slice(data);
                if !replied.get() && seen.borrow().windows(6).any(|w| w == b"HELLO\n") {
                    replied.set(true);
                    writer.write(b"HELLO\n");
                }
            });

            *slot.borrow_mut() = Some(socket);
        }),
    );

    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        mux.dispatch(Some(Duration::from_millis(10))).expect("dispatch");
        if client_seen.borrow().windows(8).any(|w| w == b"WELCOME\n") {
            break;
        }
    }

    let server_seen = server_seen.borrow();
    let client_seen = client_seen.borrow();
    assert!(server_seen.windows(6).any(|w| w == b"HELLO\n"), "server never saw HELLO");
    assert!(client_seen.windows(6).any(|w| w == b"HELLO\n"), "client never saw HELLO");
    assert!(
        client_seen.windows(8).any(|w| w == b"WELCOME\n"),
        "client never saw WELCOME"
    );
}
