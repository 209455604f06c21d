//! Absorbance from a reference and a sample spectrum.

use crate::core::Spectrum;
use crate::error::ProcessingError;

/// Decadic absorbance `log10(P_ref / P_sample)` of two dBm spectra on the same grid.
///
/// In dBm this is `(ref - sample) / 10`.
pub fn absorbance(reference: &Spectrum, sample: &Spectrum) -> Result<Spectrum, ProcessingError> {
    if reference.is_empty() || sample.is_empty() {
        return Err(ProcessingError::EmptySpectrum);
    }
    if reference.x != sample.x
        || reference.x.len() != reference.y.len()
        || sample.x.len() != sample.y.len()
    {
        return Err(ProcessingError::GridMismatch);
    }

    let y = reference
        .y
        .iter()
        .zip(&sample.y)
        .map(|(r, s)| (r - s) / 10.0)
        .collect();
    Ok(Spectrum::new(reference.x.clone(), y))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absorbance_of_ten_db_drop_is_one() {
        let grid = vec![2.0, 3.0, 4.0];
        let reference = Spectrum::new(grid.clone(), vec![-10.0, -12.0, -20.0]);
        let sample = Spectrum::new(grid.clone(), vec![-20.0, -12.0, -23.0]);
        let a = absorbance(&reference, &sample).unwrap();
        assert_eq!(a.x, grid);
        assert!((a.y[0] - 1.0).abs() < 1e-12);
        assert_eq!(a.y[1], 0.0);
        assert!((a.y[2] - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_absorbance_rejects_mismatch() {
        let reference = Spectrum::new(vec![1.0, 2.0], vec![0.0, 0.0]);
        let shifted = Spectrum::new(vec![1.0, 2.5], vec![0.0, 0.0]);
        assert_eq!(
            absorbance(&reference, &shifted),
            Err(ProcessingError::GridMismatch)
        );
        assert_eq!(
            absorbance(&Spectrum::default(), &reference),
            Err(ProcessingError::EmptySpectrum)
        );
    }
}
