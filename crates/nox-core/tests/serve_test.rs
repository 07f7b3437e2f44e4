//! Hermetic serve-loop tests: delimiting, prefix reuse, cache retention.

use std::io::Cursor;

use nox_abi::testing::MockBackend;
use nox_abi::{ModelBackend, Token};
use nox_core::engine::{Engine, EngineOptions};
use nox_core::serve::{serve_loop, ServeOptions, END_MARKER, RS};
use nox_core::StreamWriter;

fn engine(max_tokens: usize) -> Engine<MockBackend> {
    Engine::new(
        MockBackend::new(0, 32),
        EngineOptions {
            max_tokens,
            kv_window: 0,
            raw: true,
        },
    )
}

fn serve(
    engine: &mut Engine<MockBackend>,
    input: &[u8],
    opts: &ServeOptions,
    initial: Vec<Token>,
) -> Vec<u8> {
    let mut out = StreamWriter::new(Vec::new(), 0);
    serve_loop(engine, Cursor::new(input.to_vec()), &mut out, opts, initial, None).unwrap();
    out.into_inner().unwrap()
}

fn raw_opts() -> ServeOptions {
    ServeOptions {
        raw: true,
        ..Default::default()
    }
}

#[test]
fn one_sentinel_per_turn() {
    let mut eng = engine(2);
    let out = serve(&mut eng, b"hello\nworld\n", &raw_opts(), Vec::new());
    let text = String::from_utf8(out).unwrap();
    assert_eq!(text.matches(END_MARKER).count(), 2);
    // Splitting on the sentinel yields exactly one payload per turn.
    let payloads: Vec<&str> = text.split(END_MARKER).collect();
    assert_eq!(payloads.len(), 3);
    assert!(payloads[2].is_empty());
}

#[test]
fn exit_and_quit_end_the_loop() {
    for word in ["exit", "quit"] {
        let mut eng = engine(1);
        let input = format!("hello\n{word}\nignored\n");
        let out = serve(&mut eng, input.as_bytes(), &raw_opts(), Vec::new());
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches(END_MARKER).count(), 1, "{word}");
    }
}

#[test]
fn blank_prompts_are_skipped() {
    let mut eng = engine(1);
    let out = serve(&mut eng, b"\n   \nhello\n", &raw_opts(), Vec::new());
    let text = String::from_utf8(out).unwrap();
    assert_eq!(text.matches(END_MARKER).count(), 1);
}

#[test]
fn eof_without_delimiter_still_serves_the_tail() {
    let mut eng = engine(1);
    let out = serve(&mut eng, b"dangling prompt", &raw_opts(), Vec::new());
    let text = String::from_utf8(out).unwrap();
    assert_eq!(text.matches(END_MARKER).count(), 1);
}

#[test]
fn rs_mode_uses_single_byte_sentinels() {
    let mut eng = engine(1);
    let opts = ServeOptions {
        raw: true,
        use_rs: true,
        ..Default::default()
    };
    let out = serve(&mut eng, b"one\x1etwo\x1e", &opts, Vec::new());
    assert_eq!(out.iter().filter(|&&b| b == RS).count(), 2);
    assert!(!String::from_utf8(out).unwrap().contains("<<<NOX_END>>>"));
}

#[test]
fn keep_cache_prefills_only_past_the_common_prefix() {
    let mut eng = engine(0); // prefill-only turns keep the journal legible
    let opts = ServeOptions {
        raw: true,
        keep_cache: true,
        ..Default::default()
    };
    serve(&mut eng, b"hello\nhello world\n", &opts, Vec::new());

    let backend = eng.backend();
    // Turn 1: [BOS, hello] from scratch. Turn 2 shares that prefix and
    // prefills exactly one new token at position 2.
    assert_eq!(
        backend.journal.decoded_positions,
        vec![vec![0, 1], vec![2]]
    );
    // The cold start cleared once; the matching prefix never truncated.
    assert_eq!(backend.journal.kv_clears, 1);
    assert!(backend.journal.kv_seq_rms.is_empty());
}

#[test]
fn keep_cache_truncates_on_divergence() {
    let mut eng = engine(0);
    let opts = ServeOptions {
        raw: true,
        keep_cache: true,
        ..Default::default()
    };
    serve(&mut eng, b"hello world\nhello there\n", &opts, Vec::new());

    let backend = eng.backend();
    // Divergence after [BOS, hello]: the stale tail is removed, one token
    // re-prefilled.
    assert_eq!(backend.journal.kv_seq_rms, vec![(0, 2, -1)]);
    assert_eq!(
        backend.journal.decoded_positions,
        vec![vec![0, 1, 2], vec![2]]
    );
    assert_eq!(backend.cache_positions(), vec![0, 1, 2]);
}

#[test]
fn append_mode_suppresses_bos_after_first_turn() {
    let mut eng = engine(0);
    let opts = ServeOptions {
        raw: true,
        append: true,
        ..Default::default()
    };
    serve(&mut eng, b"one\ntwo\n", &opts, Vec::new());

    let backend = eng.backend();
    assert_eq!(backend.tokenize_add_special(), vec![true, false]);
    // Turn 2 lands right after turn 1's tokens.
    assert_eq!(
        backend.journal.decoded_positions,
        vec![vec![0, 1], vec![2]]
    );
}

#[test]
fn append_mode_extends_history_with_generated_tokens() {
    let mut eng = engine(2);
    let opts = ServeOptions {
        raw: true,
        append: true,
        ..Default::default()
    };
    serve(&mut eng, b"one\ntwo\n", &opts, Vec::new());

    // Turn 1: [BOS, one] + 2 generated = positions 0..4; turn 2 starts at 4.
    let positions = &eng.backend().journal.decoded_positions;
    assert_eq!(positions[0], vec![0, 1]);
    assert_eq!(positions[3], vec![4]);
    assert_eq!(eng.backend().cache_positions().len(), 7);
}

#[test]
fn initial_tokens_offset_the_first_turn() {
    // A restored session: serve continues at the loaded position, BOS off.
    let mut eng = engine(0);
    let opts = ServeOptions {
        raw: true,
        append: true,
        ..Default::default()
    };
    let initial = vec![Token(1), Token(5)];
    // Seed the cache as a state load would.
    for (i, t) in initial.iter().enumerate() {
        eng.backend_mut().batch_clear();
        eng.backend_mut().batch_add(*t, i as i32, true);
        eng.backend_mut().decode().unwrap();
    }
    serve(&mut eng, b"alpha beta\n", &opts, initial);

    let backend = eng.backend();
    assert_eq!(backend.tokenize_add_special(), vec![false]);
    let last = backend.journal.decoded_positions.last().unwrap();
    assert_eq!(last, &vec![2, 3]);
}

#[test]
fn input_only_drops_generated_tokens_from_cache() {
    let mut eng = engine(2);
    let opts = ServeOptions {
        raw: true,
        keep_cache: true,
        input_only: true,
        ..Default::default()
    };
    serve(&mut eng, b"hello\nhello\n", &opts, Vec::new());

    let backend = eng.backend();
    // Each turn trims the cache back to the 2 prompt positions.
    assert_eq!(
        backend.journal.kv_seq_rms,
        vec![(0, 2, -1), (0, 2, -1)]
    );
    assert_eq!(backend.cache_positions(), vec![0, 1]);
}

#[test]
fn reset_mode_clears_cache_every_turn() {
    let mut eng = engine(1);
    let out = serve(&mut eng, b"same\nsame\n", &raw_opts(), Vec::new());

    let backend = eng.backend();
    assert_eq!(backend.journal.kv_clears, 2);
    // Both turns replay from position 0.
    assert_eq!(backend.journal.decoded_positions[0][0], 0);
    assert_eq!(backend.journal.decoded_positions[2][0], 0);
    // Identical prompts, identical cache state: identical payloads.
    let text = String::from_utf8(out).unwrap();
    let payloads: Vec<&str> = text.split(END_MARKER).collect();
    assert_eq!(payloads[0], payloads[1]);
}

#[test]
fn state_save_snapshots_each_turn() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("serve.bin");
    let mut eng = engine(0);
    let opts = ServeOptions {
        raw: true,
        append: true,
        state_save: Some(path.clone()),
        ..Default::default()
    };
    serve(&mut eng, b"one\ntwo\n", &opts, Vec::new());

    // The file reflects the full logical history at the last snapshot.
    let mut fresh = MockBackend::new(0, 32);
    let loaded = fresh.state_load_file(&path, 1024).unwrap();
    assert_eq!(loaded.len(), 3); // [BOS, one, two]
    assert_eq!(loaded, eng.backend().cache_tokens());
}

#[test]
fn window_trims_history_between_turns() {
    let mut eng = Engine::new(
        MockBackend::new(0, 32),
        EngineOptions {
            max_tokens: 2,
            kv_window: 3,
            raw: true,
        },
    );
    let opts = ServeOptions {
        raw: true,
        keep_cache: true,
        kv_window: 3,
        ..Default::default()
    };
    serve(&mut eng, b"hello\nhello\n", &opts, Vec::new());

    let backend = eng.backend();
    // Turn 1: [BOS, hello] + 2 generated; position 3 forces one in-turn
    // shift, and the 4-token history trims to the trailing 3. Turn 2's
    // prompt no longer shares a prefix with the trimmed history, so the
    // cache is cleared and the turn replays from position 0.
    assert_eq!(backend.journal.kv_clears, 2);
    assert_eq!(
        backend.journal.decoded_positions,
        vec![
            vec![0, 1],
            vec![2],
            vec![2], // post-shift decode lands below the window
            vec![0, 1],
            vec![2],
            vec![2],
        ]
    );
    assert_eq!(backend.cache_positions(), vec![0, 1, 2]);
}
