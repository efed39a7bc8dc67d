#![no_main]

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::{Rc, Weak};
use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use localproxy_core::{
    Error, EventLoop, HalfClose, Plug, ProxyConfig, Socket, Target, new_connection,
};

#[derive(Default)]
struct Sink {
    data: RefCell<Vec<u8>>,
    closings: RefCell<u32>,
    failed: RefCell<bool>,
}

impl Plug for Sink {
    fn receive(&self, data: &[u8]) {
        self.data.borrow_mut().extend_from_slice(data);
    }

    fn closing(&self, error: Option<&io::Error>) {
        *self.closings.borrow_mut() += 1;
        if error.is_some() {
            *self.failed.borrow_mut() = true;
        }
    }

    fn sent(&self, _buffered: usize) {}

    fn log(&self, _message: &str) {}
}

fuzz_target!(|data: &[u8]| {
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let split = usize::from(split).min(rest.len());
    let (ops, contents) = rest.split_at(split);

    let Ok(mut file) = tempfile::NamedTempFile::new() else {
        return;
    };
    if file.write_all(contents).is_err() {
        return;
    }

    let event_loop = EventLoop::new();
    let sink = Rc::new(Sink::default());
    let plug: Weak<dyn Plug> = Rc::downgrade(&sink) as Weak<dyn Plug>;
    let config = ProxyConfig {
        read_chunk_size: 512,
        ..ProxyConfig::replay_file(file.path())
    };
    let Some(socket) = new_connection(event_loop.context(), &Target::new("fuzz", 0), &config, plug)
    else {
        panic!("file mode must produce a socket");
    };
    assert!(socket.socket_error().is_none());

    let mut eof_requested = false;
    let mut closed = false;
    for pair in ops.chunks(2) {
        let op = pair[0];
        let arg = pair.get(1).copied().unwrap_or(0);
        let payload = vec![arg; usize::from(arg)];
        match op % 7 {
            0 => match socket.write(&payload) {
                Ok(buffered) => {
                    assert!(!eof_requested && !closed);
                    assert_eq!(buffered, 0, "/dev/null never pushes back");
                }
                Err(Error::WriteAfterEof) => assert!(eof_requested),
                Err(Error::Closed) => assert!(closed),
                Err(other) => panic!("unexpected write error: {other}"),
            },
            1 => {
                let _ = socket.write_oob(&payload);
            }
            2 => match socket.write_eof() {
                Ok(()) => {
                    assert!(!eof_requested && !closed);
                    eof_requested = true;
                    assert_eq!(socket.half_close(), HalfClose::EofSent);
                }
                Err(Error::EofAlreadyRequested) => assert!(eof_requested),
                Err(Error::Closed) => assert!(closed),
                Err(other) => panic!("unexpected write_eof error: {other}"),
            },
            3 => socket.set_frozen(arg % 2 == 0),
            4 | 5 => {
                let _ = event_loop.turn(Some(Duration::ZERO));
            }
            _ => {
                socket.close();
                closed = true;
                assert_eq!(event_loop.context().registered_fds(), 0);
            }
        }

        let received = sink.data.borrow();
        assert!(contents.starts_with(&received[..]));
        assert!(*sink.closings.borrow() <= 1);
        assert!(!*sink.failed.borrow());
    }

    if !closed {
        socket.set_frozen(false);
        let _ = event_loop.run_until(Duration::from_secs(1), || *sink.closings.borrow() == 1);
        assert_eq!(*sink.data.borrow(), contents);
    }
    socket.close();
    assert_eq!(event_loop.context().registered_fds(), 0);
    assert!(event_loop.readiness().is_empty());
});
