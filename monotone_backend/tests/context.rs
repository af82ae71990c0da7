mod common;

use std::thread;
use std::time::Duration;

use common::{ScriptedDevice, Step, small_config};
use monotone_backend::audio_device::{DeviceCapabilities, NegotiationError};
use monotone_backend::rt_processing::{LayoutError, SampleRenderer};
use monotone_backend::{
    ChannelArea, DeviceError, FatalDeviceError, PcmDriver, Phase, RawStreamDriver,
    STREAM_THREAD_NAME, SynthContext, SynthError, Waveform, WriteError,
};
use monotone_core::{SampleFormat, SynthConfig};

const PERIOD: usize = 80;

fn context(waveform: Waveform, frequency: i32) -> (SynthContext<ScriptedDevice>, common::SharedLog) {
    let (device, log) = ScriptedDevice::new();
    let ctx = SynthContext::from_device(device, 1, 1.0, frequency, waveform, &small_config()).unwrap();
    (ctx, log)
}

#[test]
fn create_negotiates_and_sizes_buffer() {
    let (device, _log) = ScriptedDevice::new();
    let config = small_config().with_format(SampleFormat::S24_LE);
    let ctx = SynthContext::from_device(device, 2, 0.5, 440, Waveform::Triangle, &config).unwrap();

    assert_eq!(ctx.period_size(), PERIOD);
    assert_eq!(ctx.buffer_size(), 400);
    assert_eq!(ctx.sample_rate(), 8000);
    assert_eq!(ctx.channels(), 2);
    assert_eq!(ctx.format(), SampleFormat::S24_LE);
    assert_eq!(ctx.areas(), [ChannelArea { first: 0, step: 64 }, ChannelArea { first: 32, step: 64 }]);
    assert_eq!(ctx.negotiated().start_threshold, 400);
    assert_eq!(ctx.negotiated().avail_min, PERIOD);
}

#[test]
fn zero_frequency_gives_constant_sine_zero() {
    let (device, _log) = ScriptedDevice::new();
    let config = SynthConfig::new().with_format(SampleFormat::S16_LE);
    let mut ctx = SynthContext::from_device(device, 1, 1.0, 0, Waveform::Sine, &config).unwrap();

    assert_eq!(ctx.period_size(), 4410);
    let period = ctx.render_period();
    assert_eq!(period.len(), 4410 * 2);
    assert!(period.iter().all(|&b| b == 0));
}

#[test]
fn zero_frequency_square_holds_negative_full_scale() {
    let (mut ctx, _log) = context(Waveform::Square, 0);
    let period = ctx.render_period().to_vec();
    let expected = (-32767i16).to_ne_bytes();
    assert!(period.chunks(2).all(|frame| frame == expected));
}

#[test]
fn phase_is_continuous_across_periods() {
    let (mut ctx, _log) = context(Waveform::Sine, 130);
    let mut streamed = ctx.render_period().to_vec();
    streamed.extend_from_slice(ctx.render_period());

    let format = SampleFormat::S16;
    let reference = SampleRenderer::new(
        Waveform::Sine,
        1.0,
        format,
        8000,
        ChannelArea::interleaved_set(1, &format),
    );
    let mut expected = vec![0u8; 2 * PERIOD * 2];
    reference.render(&mut expected, 2 * PERIOD, 130, Phase::ZERO);
    assert_eq!(streamed, expected);
}

#[test]
fn frequency_is_clamped() {
    let (ctx, _log) = context(Waveform::Sine, 440);
    assert_eq!(ctx.frequency(), 440);
    assert_eq!(ctx.set_frequency(-10), 0);
    assert_eq!(ctx.set_frequency(10_000), 5000);
    assert_eq!(ctx.set_frequency(440), 440);

    let handle = ctx.frequency_handle();
    handle.set_frequency(9999);
    assert_eq!(ctx.frequency(), 5000);
}

#[test]
fn frequency_change_applies_at_next_period() {
    let (mut ctx, _log) = context(Waveform::Sine, 0);
    let silent = ctx.render_period().to_vec();
    assert!(silent.iter().all(|&b| b == 0));

    ctx.set_frequency(1000);
    let tone = ctx.render_period().to_vec();
    assert!(tone.chunks(2).any(|frame| frame != [0, 0]));
}

#[test]
fn invalid_voice_settings_are_rejected() {
    let (device, _log) = ScriptedDevice::new();
    let err = SynthContext::from_device(device, 1, 1.5, 440, Waveform::Sine, &small_config()).err();
    assert!(matches!(err, Some(SynthError::Volume(_))));

    let (device, _log) = ScriptedDevice::new();
    let err = SynthContext::from_device(device, 0, 1.0, 440, Waveform::Sine, &small_config()).err();
    assert!(matches!(err, Some(SynthError::NoChannels)));

    let (device, _log) = ScriptedDevice::new();
    let bad = small_config().with_period_time_us(100_000);
    let err = SynthContext::from_device(device, 1, 1.0, 440, Waveform::Sine, &bad).err();
    assert!(matches!(err, Some(SynthError::Config(_))));
}

#[test]
fn misaligned_areas_are_rejected() {
    let (device, _log) = ScriptedDevice::new();
    let areas = vec![ChannelArea { first: 3, step: 16 }];
    let err = SynthContext::from_device_with_areas(device, areas, 1.0, 440, Waveform::Sine, &small_config()).err();
    assert!(matches!(
        err,
        Some(SynthError::Layout(LayoutError::MisalignedOffset { channel: 0, bits: 3 }))
    ));
}

#[test]
fn more_areas_than_a_channel_count_can_hold_are_rejected() {
    let (device, _log) = ScriptedDevice::new();
    let areas = vec![ChannelArea { first: 0, step: 16 }; 65_536];
    let err = SynthContext::from_device_with_areas(device, areas, 1.0, 440, Waveform::Sine, &small_config()).err();
    assert!(matches!(
        err,
        Some(SynthError::Layout(LayoutError::TooManyChannels { count: 65_536 }))
    ));
}

#[test]
fn rate_mismatch_without_resample_is_a_configuration_error() {
    let (device, _log) = ScriptedDevice::new();
    let device = device.capabilities(DeviceCapabilities {
        supported_sample_rates: vec![44_100, 48_000],
        ..DeviceCapabilities::permissive()
    });
    let config = small_config().with_resample(false);
    let err = SynthContext::from_device(device, 1, 1.0, 440, Waveform::Sine, &config).err();
    assert!(matches!(
        err,
        Some(SynthError::Device(DeviceError::Negotiation(NegotiationError::RateMismatch {
            requested: 8000,
            nearest: 44_100
        })))
    ));
}

#[test]
fn fatal_write_ends_start() {
    let (device, log) = ScriptedDevice::new();
    let device = device.script([
        Step::Accept(PERIOD),
        Step::Accept(PERIOD),
        Step::Fail(WriteError::Fatal("device unplugged".into())),
    ]);
    let mut ctx = SynthContext::from_device(device, 1, 1.0, 440, Waveform::Sine, &small_config()).unwrap();

    let err = ctx.start().unwrap_err();

    assert!(err.is_fatal());
    assert!(matches!(err, SynthError::Fatal(FatalDeviceError::Write(_))));
    assert_eq!(log.lock().writes, 3);
    assert_eq!(log.lock().bytes.len(), 2 * PERIOD * 2);
    ctx.destroy();
}

#[test]
fn stream_continues_after_underrun() {
    let (device, log) = ScriptedDevice::new();
    let device = device.script([Step::Accept(PERIOD), Step::Fail(WriteError::Underrun)]);
    let ctx = SynthContext::from_device(device, 1, 1.0, 440, Waveform::Sine, &small_config()).unwrap();

    let handle = ctx.spawn().unwrap();
    log.wait_for_bytes(4 * PERIOD * 2);
    handle.stop();
    let ctx = handle.join().unwrap();

    assert_eq!(log.lock().prepares, 1);
    let stats = ctx.stats();
    assert_eq!(stats.underruns, 1);
    assert_eq!(stats.skipped_periods, 1);
    assert!(stats.periods >= 5);
    ctx.destroy();
}

#[test]
fn spawned_stream_runs_on_named_thread_and_stops() {
    let (ctx, log) = context(Waveform::Sawtooth, 220);
    let handle = ctx.spawn().unwrap();

    log.wait_for_bytes(PERIOD * 2);
    handle.set_frequency(880);
    assert_eq!(handle.frequency().frequency(), 880);
    assert!(!handle.is_finished());

    handle.stop();
    let ctx = handle.join().unwrap();
    assert_eq!(ctx.frequency(), 880);
    assert!(
        log.lock()
            .writer_threads
            .iter()
            .all(|name| name.as_deref() == Some(STREAM_THREAD_NAME))
    );
}

#[test]
fn joined_context_streams_again_on_start() {
    let (ctx, log) = context(Waveform::Sine, 440);
    let handle = ctx.spawn().unwrap();
    log.wait_for_bytes(2 * PERIOD * 2);
    handle.stop();
    let mut ctx = handle.join().unwrap();

    let writes_before = log.lock().writes;
    log.lock().fail_at_write = Some((writes_before + 3, WriteError::Fatal("unplugged".into())));

    // the earlier stop request must not end the restarted loop before it writes
    let err = ctx.start().err();
    assert!(matches!(err, Some(SynthError::Fatal(_))));
    assert_eq!(log.lock().writes, writes_before + 3);
    ctx.destroy();
}

#[test]
fn spawned_stream_reports_fatal_error_on_join() {
    let (device, _log) = ScriptedDevice::new();
    let device = device.script([Step::Fail(WriteError::Fatal("gone".into()))]);
    let ctx = SynthContext::from_device(device, 1, 1.0, 440, Waveform::Sine, &small_config()).unwrap();

    let handle = ctx.spawn().unwrap();
    while !handle.is_finished() {
        thread::sleep(Duration::from_millis(1));
    }
    let err = handle.join().err();
    assert!(matches!(err, Some(SynthError::Fatal(_))));
}

#[test]
fn dropping_the_handle_stops_the_stream() {
    let (ctx, log) = context(Waveform::Sine, 440);
    let handle = ctx.spawn().unwrap();
    log.wait_for_bytes(PERIOD * 2);
    drop(handle);

    let written = log.lock().bytes.len();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(log.lock().bytes.len(), written);
}

#[test]
fn create_through_raw_stream_driver_writes_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.raw");
    let driver = RawStreamDriver::new().paced(true);
    // the driver opens the path; check it is reachable before handing it over
    assert!(driver.open(path.to_str().unwrap()).is_ok());

    let config = small_config().with_format(SampleFormat::S16_LE);
    let ctx = SynthContext::create(&driver, path.to_str().unwrap(), 2, 0.8, 440, Waveform::Sine, &config).unwrap();
    let handle = ctx.spawn().unwrap();
    thread::sleep(Duration::from_millis(30));
    handle.stop();
    handle.join().unwrap().destroy();

    let bytes = std::fs::read(&path).unwrap();
    assert!(!bytes.is_empty());
    assert_eq!(bytes.len() % (PERIOD * 2 * 2), 0);
}

#[test]
fn create_reports_open_failure() {
    let driver = RawStreamDriver::new();
    let err = SynthContext::create(
        &driver,
        "/nonexistent-dir/monotone/tone.raw",
        1,
        1.0,
        440,
        Waveform::Sine,
        &small_config(),
    )
    .err();
    assert!(matches!(err, Some(SynthError::Device(DeviceError::Open { .. }))));
}
