//! Line-oriented greeting server.
//!
//! Accepts one client at a time, greets it with `HELLO`, answers `HELLO`
//! with `WELCOME`, and hangs up after five seconds of service.

use muxer::net::StreamTransport;
use muxer::{BufferedSocket, Multiplexer, SharedTransport};

use std::cell::RefCell;
use std::error::Error;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const SERVE_FOR: Duration = Duration::from_secs(5);

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().init();

    let mux = Rc::new(Multiplexer::new());

    let master = StreamTransport::listen("127.0.0.1:9999")?;
    info!("listening on {}", master.local_addr()?);
    let master: SharedTransport = Rc::new(RefCell::new(master));

    let client: Rc<RefCell<Option<(BufferedSocket, Instant)>>> = Rc::new(RefCell::new(None));

    let mux_handle = Rc::downgrade(&mux);
    let client_slot = client.clone();
    mux.attach_read(
        master,
        Box::new(move |master, _| {
            let Some(mux) = mux_handle.upgrade() else {
                return;
            };

            let stream = match StreamTransport::accept(&*master.borrow()) {
                Ok(stream) => stream,
                Err(err) => {
                    warn!("accept failed: {err}");
                    return;
                }
            };
            if let Ok(peer) = stream.peer_addr() {
                info!("new connection from {peer}");
            }

            let transport: SharedTransport = Rc::new(RefCell::new(stream));
            let socket = match BufferedSocket::new(transport, &mux) {
                Ok(socket) => socket,
                Err(err) => {
                    warn!("socket setup failed: {err}");
                    return;
                }
            };

            let writer = socket.clone();
            socket.on_input(move |data| {
                let message = String::from_utf8_lossy(data);
                let message = message.trim();
                info!("received {message:?}");

                if message == "HELLO" {
                    thread::sleep(Duration::from_secs(1));
                    writer.write(b"WELCOME\n");
                }
            });
            socket.on_close(|reason| info!("client closed: {reason}"));
            socket.on_error(|err| warn!("client error: {err}"));
            socket.write(b"HELLO\n");

            *client_slot.borrow_mut() = Some((socket, Instant::now()));
        }),
    );

    loop {
        let expired = client
            .borrow()
            .as_ref()
            .is_some_and(|(_, since)| since.elapsed() > SERVE_FOR);
        if expired {
            if let Some((socket, _)) = client.borrow_mut().take() {
                socket.close();
            }
        }

        mux.dispatch(None)?;
        thread::sleep(Duration::from_millis(1));
    }
}
