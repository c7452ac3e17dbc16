//! Partitioning of location codes into request-sized batches.

/// Split `codes` into contiguous batches of at most `batch_size` codes.
///
/// Order is preserved and every code lands in exactly one batch. An empty
/// input yields no batches. A `batch_size` of 0 is treated as 1.
pub fn plan_batches<S: AsRef<str>>(codes: &[S], batch_size: usize) -> Vec<Vec<String>> {
    codes
        .chunks(batch_size.max(1))
        .map(|chunk| chunk.iter().map(|c| c.as_ref().to_owned()).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{:05}", 75001 + i)).collect()
    }

    #[test]
    fn empty_input_yields_no_batches() {
        let empty: Vec<String> = Vec::new();
        assert!(plan_batches(&empty, 3).is_empty());
    }

    #[test]
    fn exact_multiple() {
        let batches = plan_batches(&codes(6), 3);
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.len() == 3));
    }

    #[test]
    fn remainder_goes_in_last_batch() {
        let batches = plan_batches(&["a", "b", "c"], 2);
        assert_eq!(batches, vec![vec!["a", "b"], vec!["c"]]);
    }

    #[test]
    fn zero_batch_size_is_one() {
        let batches = plan_batches(&["a", "b"], 0);
        assert_eq!(batches, vec![vec!["a"], vec!["b"]]);
    }

    #[test]
    fn partition_is_total_ordered_and_bounded() {
        for n in 0..40 {
            for size in 1..12 {
                let input = codes(n);
                let batches = plan_batches(&input, size);
                assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= size));
                let flattened: Vec<String> = batches.into_iter().flatten().collect();
                assert_eq!(flattened, input, "n={n} size={size}");
            }
        }
    }
}
