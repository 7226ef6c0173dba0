mod common;

use std::sync::Arc;

use bewegt::filter::{FilterGraph, FilterKind, FilterParams};
use bewegt::{Buffer, ErrorKind, EventKind, Flush, Region, SourceState, LOOP_INFINITE};
use common::*;
use parking_lot::Mutex;

fn tick_until_stopped(ctx: &bewegt::Context, source: &bewegt::Source, limit: usize) -> usize {
    let mut ticks = 0;
    while source.state() == SourceState::Playing && ticks < limit {
        ctx.tick();
        ticks += 1;
    }
    ticks
}

#[test]
fn finite_loops_end_with_one_end_of_buffer() {
    for n in [0u8, 1, 5] {
        let ctx = context(4);
        let events = record(&ctx);
        let source = ctx.create_source();
        source.set_buffer(Some(&ramp(4))).unwrap();
        source.play(n).unwrap();

        let ticks = tick_until_stopped(&ctx, &source, 100);
        assert_eq!(ticks, n as usize + 1);
        assert_eq!(output(&ctx), vec![1, 2, 3, 4]);

        ctx.dispatch();
        let mut expected = vec![EventKind::StartOfBuffer];
        expected.extend(std::iter::repeat(EventKind::EndOfLoop).take(n as usize));
        expected.push(EventKind::EndOfBuffer);
        assert_eq!(*events.lock(), expected, "loop count {n}");
    }
}

#[test]
fn infinite_loops_never_end_until_drained() {
    let ctx = context(4);
    let events = record(&ctx);
    let source = ctx.create_source();
    source.set_buffer(Some(&ramp(4))).unwrap();
    source.play(LOOP_INFINITE).unwrap();

    for _ in 0..50 {
        ctx.tick();
        ctx.dispatch();
    }
    assert_eq!(source.state(), SourceState::Playing);
    {
        let seen = events.lock();
        assert!(!seen.contains(&EventKind::EndOfBuffer));
        assert_eq!(seen.iter().filter(|k| **k == EventKind::EndOfLoop).count(), 50);
    }

    source.stop(Flush::Drain).unwrap();
    ctx.tick();
    ctx.dispatch();
    assert_eq!(output(&ctx), vec![1, 2, 3, 4]);
    assert_eq!(source.state(), SourceState::Stopped);
    assert_eq!(events.lock().last(), Some(&EventKind::EndOfBuffer));
}

#[test]
fn pause_freezes_position() {
    let ctx = context(2);
    let source = ctx.create_source();
    source.set_buffer(Some(&ramp(10))).unwrap();
    source.play(0).unwrap();

    ctx.tick();
    assert_eq!(output(&ctx), vec![1, 2]);
    ctx.tick();
    assert_eq!(source.position(), 4);

    source.pause(true).unwrap();
    ctx.tick();
    assert_eq!(output(&ctx), vec![0, 0]);
    assert_eq!(source.position(), 4);
    assert_eq!(source.state(), SourceState::Paused);

    source.pause(false).unwrap();
    ctx.tick();
    assert_eq!(output(&ctx), vec![5, 6]);
    assert_eq!(source.position(), 6);
    assert_eq!(source.position_ms(), 120);
}

#[test]
fn pausing_a_stopped_source_is_a_state_error() {
    let ctx = context(2);
    let source = ctx.create_source();
    assert_eq!(source.pause(true).unwrap_err().kind(), ErrorKind::State);
    assert_eq!(source.play(0).unwrap_err().kind(), ErrorKind::State);
}

#[test]
fn force_stop_takes_effect_on_the_next_tick() {
    let ctx = context(2);
    let source = ctx.create_source();
    source.set_buffer(Some(&ramp(10))).unwrap();
    source.play(0).unwrap();
    ctx.tick();
    source.stop(Flush::Force).unwrap();
    ctx.tick();
    assert_eq!(output(&ctx), vec![0, 0]);
    assert_eq!(source.state(), SourceState::Stopped);

    // a stopped source restarts from the top
    source.play(0).unwrap();
    ctx.tick();
    assert_eq!(output(&ctx), vec![1, 2]);
}

#[test]
fn speed_scales_the_step() {
    let ctx = context(2);
    let source = ctx.create_source();
    source.set_buffer(Some(&ramp(8))).unwrap();
    assert_eq!(source.set_speed(150).unwrap_err().kind(), ErrorKind::Validation);
    source.set_speed(200).unwrap();
    source.play(0).unwrap();
    ctx.tick();
    assert_eq!(output(&ctx), vec![1, 3]);
    assert_eq!(source.position(), 4);
}

#[test]
fn slower_buffers_are_held_to_the_master_rate() {
    let ctx = context(4);
    let source = ctx.create_source();
    let buffer = Buffer::from_bytes(mono(25), &bytes(&[10, 20])).unwrap();
    source.set_buffer(Some(&buffer)).unwrap();
    source.play(0).unwrap();
    ctx.tick();
    assert_eq!(output(&ctx), vec![10, 10, 20, 20]);
}

#[test]
fn volumes_scale_and_sources_sum() {
    let ctx = context(2);
    let a = ctx.create_source();
    let b = ctx.create_source();
    a.set_buffer(Some(&Buffer::from_bytes(mono(50), &bytes(&[100, 200])).unwrap()))
        .unwrap();
    b.set_buffer(Some(&Buffer::from_bytes(mono(50), &bytes(&[1000, 1000])).unwrap()))
        .unwrap();
    assert_eq!(a.set_volume(101).unwrap_err().kind(), ErrorKind::Validation);
    b.set_volume(50).unwrap();
    a.play(0).unwrap();
    b.play(0).unwrap();
    ctx.tick();
    assert_eq!(output(&ctx), vec![600, 700]);

    let ctx = context(2);
    ctx.set_master_volume(50).unwrap();
    let a = ctx.create_source();
    a.set_buffer(Some(&Buffer::from_bytes(mono(50), &bytes(&[100, 200])).unwrap()))
        .unwrap();
    a.play(0).unwrap();
    ctx.tick();
    assert_eq!(output(&ctx), vec![50, 100]);
}

#[test]
fn sum_saturates_at_full_scale() {
    let ctx = context(1);
    for _ in 0..2 {
        let s = ctx.create_source();
        s.set_buffer(Some(&Buffer::from_bytes(mono(50), &bytes(&[30_000])).unwrap()))
            .unwrap();
        s.play(0).unwrap();
    }
    ctx.tick();
    assert_eq!(output(&ctx), vec![i16::MAX]);
}

#[test]
fn regions_loop_inside_the_play_range() {
    let ctx = context(6);
    let tokens = Arc::new(Mutex::new(Vec::new()));
    let log = tokens.clone();
    ctx.dispatcher()
        .listen_all(Box::new(move |e| log.lock().push((e.kind, e.token))));

    let buffer = ramp(8);
    buffer
        .set_region(Region::whole().play(2, 4).looping(1, 2).loop_count(1).token(7))
        .unwrap();
    let source = ctx.create_source();
    source.set_buffer(Some(&buffer)).unwrap();
    source.play_region().unwrap();
    ctx.tick();
    assert_eq!(output(&ctx), vec![3, 4, 5, 4, 5, 6]);

    ctx.dispatch();
    assert_eq!(
        *tokens.lock(),
        vec![
            (EventKind::StartOfBuffer, 7),
            (EventKind::EndOfLoop, 7),
            (EventKind::EndOfBuffer, 7)
        ]
    );
}

#[test]
fn out_of_range_regions_fail_at_play() {
    let ctx = context(2);
    let buffer = ramp(4);
    buffer.set_region(Region::whole().play(2, 8)).unwrap();
    let source = ctx.create_source();
    source.set_buffer(Some(&buffer)).unwrap();
    assert_eq!(source.play(0).unwrap_err().kind(), ErrorKind::Validation);
    assert_eq!(source.state(), SourceState::Stopped);
}

#[test]
fn buffers_cannot_change_while_playing() {
    let ctx = context(2);
    let buffer = ramp(10);
    let source = ctx.create_source();
    source.set_buffer(Some(&buffer)).unwrap();
    source.play(0).unwrap();
    assert_eq!(source.set_buffer(Some(&ramp(2))).unwrap_err().kind(), ErrorKind::State);
    assert_eq!(buffer.clone().delete().unwrap_err().kind(), ErrorKind::State);

    source.stop(Flush::Force).unwrap();
    source.set_buffer(None).unwrap();
    assert_eq!(buffer.attachments(), 0);
    buffer.delete().unwrap();
}

#[test]
fn listeners_registered_at_play_see_their_events() {
    let ctx = context(4);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let source = ctx.create_source();
    source.set_buffer(Some(&ramp(4))).unwrap();
    source.play_with(0, move |e| log.lock().push(e.kind)).unwrap();
    ctx.tick();
    ctx.dispatch();
    assert_eq!(*seen.lock(), vec![EventKind::StartOfBuffer, EventKind::EndOfBuffer]);
}

#[test]
fn edited_filters_are_rebuilt_between_ticks() {
    let ctx = context(1);
    let graph = FilterGraph::new();
    let scale = graph.create(FilterKind::Scale).unwrap();
    graph.set_params(scale, &[FilterParams::Scale { factor: 2.0 }]).unwrap();

    let source = ctx.create_source();
    source.set_buffer(Some(&Buffer::from_bytes(mono(50), &bytes(&[100, 100])).unwrap()))
        .unwrap();
    source.set_filter(Some((&graph, scale))).unwrap();
    source.play(0).unwrap();
    ctx.tick();
    assert_eq!(output(&ctx), vec![200]);

    graph.set_params(scale, &[FilterParams::Scale { factor: 3.0 }]).unwrap();
    ctx.tick();
    assert_eq!(output(&ctx), vec![300]);
}

#[test]
fn unbuildable_filter_stops_the_source_with_an_error_event() {
    let ctx = context(2);
    let events = record(&ctx);
    let graph = FilterGraph::new();
    let tilt = graph.create(FilterKind::Tilt).unwrap();

    let source = ctx.create_source();
    source.set_buffer(Some(&ramp(4))).unwrap();
    source.set_filter(Some((&graph, tilt))).unwrap();
    source.play(0).unwrap();
    ctx.tick();
    ctx.dispatch();

    assert_eq!(source.state(), SourceState::Stopped);
    assert_eq!(*events.lock(), vec![EventKind::Error]);
    assert_eq!(output(&ctx), vec![0, 0]);
}

#[test]
fn playing_count_follows_source_states() {
    let ctx = context(2);
    let a = ctx.create_source();
    let b = ctx.create_source();
    a.set_buffer(Some(&ramp(2))).unwrap();
    b.set_buffer(Some(&ramp(100))).unwrap();
    a.play(0).unwrap();
    b.play(0).unwrap();
    assert_eq!(ctx.playing_source_count(), 2);

    ctx.tick();
    ctx.tick();
    assert_eq!(ctx.playing_source_count(), 1);

    b.pause(true).unwrap();
    assert_eq!(ctx.playing_source_count(), 0);
    b.pause(false).unwrap();
    ctx.stop_all_sources().unwrap();
    assert_eq!(ctx.playing_source_count(), 0);
}
