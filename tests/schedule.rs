use shortsmith::caption::{image_slots, CaptionSettings, Timeline, TRAILING_HOLD};
use shortsmith::metadata::Word;

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

fn moon_landing() -> Vec<Word> {
    vec![
        Word::new("the", 0.0, 0.3),
        Word::new("moon", 0.3, 0.7),
        Word::new("landing", 0.8, 1.3),
    ]
}

#[test]
fn moon_landing_is_one_batch_with_gap_aware_highlights() {
    let timeline = Timeline::build(&moon_landing(), 1, &CaptionSettings::default()).unwrap();

    let batches = timeline.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].words, 0..3);
    assert!(approx(batches[0].shown_at, 0.0));
    assert!(approx(batches[0].removed_at, 1.3 + TRAILING_HOLD));

    let highlights = timeline.highlights();
    let spans: Vec<(f64, f64)> = highlights.iter().map(|h| (h.start, h.end)).collect();
    let expected = [(0.0, 0.3), (0.3, 0.7), (0.8, 1.3)];
    assert_eq!(spans.len(), expected.len());
    for ((start, end), (want_start, want_end)) in spans.iter().zip(expected) {
        assert!(approx(*start, want_start), "{start} != {want_start}");
        assert!(approx(*end, want_end), "{end} != {want_end}");
    }

    assert!(approx(timeline.duration, 2.3));
}

#[test]
fn two_images_split_ten_seconds_evenly() {
    let slots = image_slots(10.0, 2);
    assert_eq!(slots.len(), 2);
    assert!(approx(slots[0].start, 0.0));
    assert!(approx(slots[0].duration, 5.0));
    assert!(approx(slots[1].start, 5.0));
    assert!(approx(slots[1].duration, 5.0));
}

#[test]
fn image_slots_cover_the_presentation_exactly() {
    for count in 1..=7 {
        let total = 13.7;
        let slots = image_slots(total, count);
        assert_eq!(slots.len(), count);
        let sum: f64 = slots.iter().map(|s| s.duration).sum();
        assert!((sum - total).abs() < 1e-9);
        let last = slots.last().unwrap();
        assert!((last.start + last.duration - total).abs() < 1e-9);
        for pair in slots.windows(2) {
            assert!(approx(pair[0].start + pair[0].duration, pair[1].start));
        }
    }
}

#[test]
fn oversized_batch_holds_every_word() {
    let settings = CaptionSettings {
        num_simultaneous_words: 10,
        ..Default::default()
    };
    let timeline = Timeline::build(&moon_landing(), 2, &settings).unwrap();
    let batches = timeline.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].words, 0..3);
}

#[test]
fn batches_partition_words_in_order() {
    let words: Vec<Word> = (0..8)
        .map(|i| Word::new(format!("w{i}"), i as f64 * 0.5, i as f64 * 0.5 + 0.4))
        .collect();
    let settings = CaptionSettings {
        num_simultaneous_words: 3,
        ..Default::default()
    };
    let timeline = Timeline::build(&words, 1, &settings).unwrap();
    let ranges: Vec<_> = timeline.batches().into_iter().map(|b| b.words).collect();
    assert_eq!(ranges, vec![0..3, 3..6, 6..8]);

    let last = timeline.batches().pop().unwrap();
    assert!(approx(last.removed_at, words[7].end + TRAILING_HOLD));
}

#[test]
fn scheduling_is_deterministic() {
    let settings = CaptionSettings {
        num_simultaneous_words: 2,
        stream: true,
        ..Default::default()
    };
    let first = Timeline::build(&moon_landing(), 3, &settings).unwrap();
    let second = Timeline::build(&moon_landing(), 3, &settings).unwrap();
    assert_eq!(first, second);
}

fn spaced_words(count: usize) -> Vec<Word> {
    (0..count)
        .map(|i| Word::new(format!("w{i}"), i as f64 * 0.5, i as f64 * 0.5 + 0.4))
        .collect()
}

#[test]
fn batches_follow_each_other_without_overlap() {
    let words = spaced_words(7);
    for stream in [false, true] {
        let settings = CaptionSettings {
            num_simultaneous_words: 3,
            stream,
            ..Default::default()
        };
        let timeline = Timeline::build(&words, 2, &settings).unwrap();
        let batches = timeline.batches();
        assert_eq!(batches.len(), 3, "stream={stream}");

        assert!(approx(batches[0].shown_at, words[0].start));
        for pair in batches.windows(2) {
            assert!(pair[0].removed_at <= pair[1].shown_at + 1e-9, "stream={stream}");
            assert!(
                approx(pair[1].shown_at, words[pair[1].words.start].start),
                "stream={stream}: batch {} shown at {}",
                pair[1].index,
                pair[1].shown_at
            );
        }
        let last = batches.last().unwrap();
        assert!(approx(last.removed_at, words[6].end + TRAILING_HOLD));

        // Waits plus highlight holds span first start to last end.
        let highlights = timeline.highlights();
        assert!(approx(highlights[0].start, words[0].start));
        assert!(approx(highlights.last().unwrap().end, words[6].end));
    }
}

#[test]
fn overlap_at_a_batch_boundary_clamps_the_wait() {
    // "c" starts before "b" has ended; the following batches shift by 0.1s.
    let words = vec![
        Word::new("a", 0.0, 0.5),
        Word::new("b", 0.5, 1.0),
        Word::new("c", 0.9, 1.4),
        Word::new("d", 1.5, 2.0),
        Word::new("e", 2.0, 2.5),
        Word::new("f", 2.6, 3.0),
    ];
    for stream in [false, true] {
        let settings = CaptionSettings {
            num_simultaneous_words: 2,
            stream,
            ..Default::default()
        };
        let timeline = Timeline::build(&words, 1, &settings).unwrap();
        let batches = timeline.batches();
        assert_eq!(batches.len(), 3, "stream={stream}");

        for pair in batches.windows(2) {
            assert!(pair[0].removed_at <= pair[1].shown_at + 1e-9, "stream={stream}");
        }
        assert!(approx(batches[0].removed_at, 1.0));
        assert!(approx(batches[1].shown_at, 1.0));
        assert!(approx(batches[1].removed_at, 2.1));
        assert!(approx(batches[2].shown_at, 2.1));
        assert!(approx(batches[2].removed_at, 3.0 + 0.1 + TRAILING_HOLD));

        let highlights = timeline.highlights();
        assert!(highlights.windows(2).all(|h| h[0].end <= h[1].start + 1e-9));
    }
}
