//! The current context is process-wide, so everything touching it lives in
//! one test.

mod common;

use bewegt::current;
use bewegt::{DeviceMove, ErrorKind, Flush};
use common::*;

#[test]
fn current_context_lifecycle() {
    assert!(current::current().is_none());
    assert_eq!(current::create_source().unwrap_err().kind(), ErrorKind::State);
    assert_eq!(current::tick().unwrap_err().kind(), ErrorKind::State);

    let first = context(2);
    let second = context(2);
    current::set_current(&first).unwrap();
    current::set_current(&first).unwrap();

    let source = current::create_source().unwrap();
    source.set_buffer(Some(&ramp(4))).unwrap();
    source.play(0).unwrap();
    current::tick().unwrap();
    assert_eq!(output(&first), vec![1, 2]);
    assert_eq!(current::playing_source_count().unwrap(), 1);

    let err = current::set_current(&second).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
    assert_eq!(current::current(), Some(first.clone()));

    source.stop(Flush::Force).unwrap();
    current::set_current(&second).unwrap();
    assert_eq!(current::current(), Some(second.clone()));
    assert_eq!(current::playing_source_count().unwrap(), 0);

    current::set_master_volume(50).unwrap();
    assert_eq!(second.master_volume(), 50);
    current::start(DeviceMove::DEFAULT).unwrap();
    current::stop(DeviceMove::DEFAULT).unwrap();

    current::destroy().unwrap();
    assert!(current::current().is_none());
    assert_eq!(current::destroy().unwrap_err().kind(), ErrorKind::State);

    current::set_current(&first).unwrap();
    first.destroy().unwrap();
    assert!(current::current().is_none());
}
