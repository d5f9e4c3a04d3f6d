//! Plain-number metrics shared by the evaluator and the cross-validation report.

/// Fraction of `predicted` labels equal to their `targets`, `0.0` when empty.
pub fn accuracy(predicted: &[usize], targets: &[usize]) -> f64 {
    debug_assert_eq!(predicted.len(), targets.len());
    if targets.is_empty() {
        return 0.0;
    }
    let correct = predicted
        .iter()
        .zip(targets)
        .filter(|(prediction, target)| prediction == target)
        .count();
    correct as f64 / targets.len() as f64
}

/// Arithmetic mean, `0.0` when empty.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// `matrix[target][predicted]` counts. Labels outside `num_classes` are ignored.
pub fn confusion_matrix(
    predicted: &[usize],
    targets: &[usize],
    num_classes: usize,
) -> Vec<Vec<usize>> {
    let mut matrix = vec![vec![0; num_classes]; num_classes];
    for (&prediction, &target) in predicted.iter().zip(targets) {
        if prediction < num_classes && target < num_classes {
            matrix[target][prediction] += 1;
        }
    }
    matrix
}
