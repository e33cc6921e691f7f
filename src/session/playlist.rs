//! Blended playlist construction for shared sessions

use crate::types::Track;
use rand::Rng;
use std::collections::HashSet;

/// A room's top `limit` tracks by play count, most played first
pub fn top_tracks(tracks: &[Track], limit: usize) -> Vec<Track> {
    let mut seen = HashSet::new();
    let mut ranked: Vec<Track> = tracks
        .iter()
        .filter(|track| seen.insert(track.id.clone()))
        .cloned()
        .collect();
    // Stable, so equal play counts keep the directory's order
    ranked.sort_by(|a, b| b.play_count.cmp(&a.play_count));
    ranked.truncate(limit);
    ranked
}

/// Interleave two track lists, drawing from `a` with probability `ratio` at
/// each step. Once one side runs dry the rest of the other is appended.
///
/// Every distinct track appears exactly once in the output.
pub fn interleave<R: Rng + ?Sized>(
    a: Vec<Track>,
    b: Vec<Track>,
    ratio: f64,
    rng: &mut R,
) -> Vec<Track> {
    let ratio = ratio.clamp(0.0, 1.0);
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(a.len() + b.len());
    let mut a = a.into_iter().peekable();
    let mut b = b.into_iter().peekable();

    loop {
        let next = match (a.peek().is_some(), b.peek().is_some()) {
            (true, true) => {
                if rng.random::<f64>() < ratio {
                    a.next()
                } else {
                    b.next()
                }
            }
            (true, false) => a.next(),
            (false, true) => b.next(),
            (false, false) => break,
        };

        if let Some(track) = next {
            if seen.insert(track.id.clone()) {
                merged.push(track);
            }
        }
    }

    merged
}

/// Build the shared playlist: interleaved top tracks, then mood-matched
/// filler until `cap` is reached.
///
/// Interleaved tracks are never cut by the cap; only filler is limited.
pub fn blend_playlist<R: Rng + ?Sized>(
    top_a: Vec<Track>,
    top_b: Vec<Track>,
    ratio: f64,
    filler: Vec<Track>,
    cap: usize,
    rng: &mut R,
) -> Vec<Track> {
    let mut playlist = interleave(top_a, top_b, ratio, rng);
    let mut seen: HashSet<String> = playlist.iter().map(|track| track.id.clone()).collect();

    for track in filler {
        if playlist.len() >= cap {
            break;
        }
        if seen.insert(track.id.clone()) {
            playlist.push(track);
        }
    }

    playlist
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn tracks(prefix: &str, count: usize) -> Vec<Track> {
        (0..count)
            .map(|i| {
                Track::new(format!("{}-{}", prefix, i), format!("Song {}", i), "Artist")
                    .with_play_count((count - i) as u32)
            })
            .collect()
    }

    #[test]
    fn test_top_tracks_by_play_count() {
        let mut input = tracks("a", 3);
        input.push(Track::new("hit", "Hit", "Artist").with_play_count(100));
        let top = top_tracks(&input, 2);
        assert_eq!(top[0].id, "hit");
        assert_eq!(top[1].id, "a-0");
    }

    #[test]
    fn test_interleave_keeps_every_track_once() {
        let mut rng = StdRng::seed_from_u64(7);
        for ratio in [0.0, 0.3, 0.5, 1.0] {
            let merged = interleave(tracks("a", 5), tracks("b", 4), ratio, &mut rng);
            assert_eq!(merged.len(), 9);
            let ids: HashSet<_> = merged.iter().map(|t| t.id.clone()).collect();
            assert_eq!(ids.len(), 9);
        }
    }

    #[test]
    fn test_interleave_preserves_each_side_order() {
        let mut rng = StdRng::seed_from_u64(42);
        let merged = interleave(tracks("a", 5), tracks("b", 5), 0.5, &mut rng);
        let a_order: Vec<_> = merged.iter().filter(|t| t.id.starts_with("a-")).collect();
        for (i, track) in a_order.iter().enumerate() {
            assert_eq!(track.id, format!("a-{}", i));
        }
    }

    #[test]
    fn test_shared_track_is_not_duplicated() {
        let mut rng = StdRng::seed_from_u64(1);
        let shared = Track::new("shared", "Both Rooms", "Artist");
        let merged = interleave(vec![shared.clone()], vec![shared], 0.5, &mut rng);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn test_filler_stops_at_cap() {
        let mut rng = StdRng::seed_from_u64(3);
        let playlist = blend_playlist(
            tracks("a", 3),
            tracks("b", 3),
            0.5,
            tracks("filler", 30),
            10,
            &mut rng,
        );
        assert_eq!(playlist.len(), 10);
        assert_eq!(playlist.iter().filter(|t| t.id.starts_with("filler")).count(), 4);
    }
}
