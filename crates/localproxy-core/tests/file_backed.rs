//! File-backed (replay) mode: reads come from a file, writes are discarded.

mod common;

use std::io::Write;
use std::time::Duration;

use common::{connect, pattern};
use localproxy_core::{HalfClose, ProxyConfig, ProxyMode, Role, SetupError, Socket};

fn replay_file(contents: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn replays_whole_file_then_one_eof() {
    let contents = pattern(100 * 1024);
    let file = replay_file(&contents);
    let session = connect(&ProxyConfig::replay_file(file.path()));
    assert!(session.socket.socket_error().is_none());

    session.wait_for("end of file", |plug| plug.has_closed());
    session.idle(Duration::from_millis(50));

    assert!(session.plug.received() == contents);
    assert_eq!(session.plug.closings(), vec![None]);
    assert!(session.socket.descriptor(Role::DataIn).is_none());
}

#[test]
fn empty_file_closes_without_data() {
    let file = replay_file(b"");
    let session = connect(&ProxyConfig::replay_file(file.path()));
    session.wait_for("end of file", |plug| plug.has_closed());
    assert!(session.plug.received().is_empty());
    assert_eq!(session.plug.closings(), vec![None]);
}

#[test]
fn missing_file_is_a_setup_error_naming_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("no-such-replay.bin");
    let session = connect(&ProxyConfig::replay_file(&path));

    let message = session.socket.socket_error().unwrap();
    assert!(message.contains(&path.display().to_string()), "{message}");
    assert!(matches!(
        session.socket.setup_error().as_deref(),
        Some(SetupError::Input { .. })
    ));

    session.idle(Duration::from_millis(50));
    assert!(!session.plug.has_closed());
    assert!(session.plug.received().is_empty());
}

#[test]
fn writes_are_discarded() {
    let file = replay_file(b"reply");
    let session = connect(&ProxyConfig::replay_file(file.path()));

    assert_eq!(session.socket.write(&pattern(256 * 1024)).unwrap(), 0);
    session.socket.write_oob(b"urgent").unwrap();
    session.socket.write_eof().unwrap();
    assert_eq!(session.socket.half_close(), HalfClose::EofSent);
    assert!(session.socket.descriptor(Role::DataOut).is_none());

    session.wait_for("end of file", |plug| plug.has_closed());
    assert_eq!(session.plug.received(), b"reply");
}

#[test]
fn fuzz_alias_selects_file_mode() {
    let file = replay_file(b"from toml");
    let text = format!(
        "mode = \"fuzz\"\ncommand = \"{}\"\n",
        file.path().display()
    );
    let config = ProxyConfig::from_toml_str(&text).unwrap();
    assert_eq!(config.mode, ProxyMode::File);

    let session = connect(&config);
    session.wait_for("end of file", |plug| plug.has_closed());
    assert_eq!(session.plug.received(), b"from toml");
}

#[test]
fn non_local_modes_decline() {
    let event_loop = localproxy_core::EventLoop::new();
    let plug = std::rc::Rc::new(common::Recorder::default());
    let weak: std::rc::Weak<dyn localproxy_core::Plug> =
        std::rc::Rc::downgrade(&plug) as std::rc::Weak<dyn localproxy_core::Plug>;

    for mode in [ProxyMode::None, ProxyMode::Http, ProxyMode::Socks5] {
        let config = ProxyConfig {
            mode,
            ..ProxyConfig::default()
        };
        let socket = localproxy_core::new_connection(
            event_loop.context(),
            &localproxy_core::Target::new("h", 1),
            &config,
            weak.clone(),
        );
        assert!(socket.is_none());
    }
    assert!(plug.logs().is_empty());
}
