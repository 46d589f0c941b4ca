use anyhow::{anyhow, Result};

/// Dense row-major f32 tensor exchanged with inference engines.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Build a tensor, checking that the shape covers exactly `data.len()` elements.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected = shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| anyhow!("tensor shape {:?} overflows", shape))?;
        if expected != data.len() {
            return Err(anyhow!(
                "tensor shape {:?} needs {} elements, got {}",
                shape,
                expected,
                data.len()
            ));
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: Vec<usize>) -> Result<Self> {
        let len = shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| anyhow!("tensor shape {:?} overflows", shape))?;
        Self::new(shape, vec![0.0; len])
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn into_parts(self) -> (Vec<usize>, Vec<f32>) {
        (self.shape, self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tensor_rejects_mismatched_shape() {
        assert!(Tensor::new(vec![1, 2, 3], vec![0.0; 6]).is_ok());
        assert!(Tensor::new(vec![1, 2, 3], vec![0.0; 5]).is_err());
        assert!(Tensor::new(vec![usize::MAX, 2], Vec::new()).is_err());
    }

    #[test]
    fn zero_sized_dimension_is_empty() -> Result<()> {
        let t = Tensor::zeros(vec![1, 5, 0])?;
        assert!(t.data().is_empty());
        assert_eq!(t.rank(), 3);
        Ok(())
    }
}
