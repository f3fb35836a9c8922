use race_types::Sentence;

/// Sentence chosen for a round number from a creation-ordered pool:
/// `pool[(n - 1) mod len]`. Pure, so the round-to-sentence mapping is
/// reproducible from the pool snapshot alone. Returns `None` only for an
/// empty pool, which callers treat as a fatal configuration error.
pub fn sentence_for(pool: &[Sentence], round_number: i64) -> Option<&Sentence> {
    if pool.is_empty() {
        return None;
    }
    let idx = (round_number - 1).rem_euclid(pool.len() as i64) as usize;
    pool.get(idx)
}
