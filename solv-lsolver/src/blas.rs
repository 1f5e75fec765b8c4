//! Local vector kernels. Reductions over ranks are done by the caller.

use num_traits::Float;

/// Local part of a dot product.
pub fn dot<T: Float>(x: &[T], y: &[T]) -> T {
    x.iter()
        .zip(y.iter())
        .fold(T::zero(), |acc, (&a, &b)| acc + a * b)
}

/// y = y + alpha * x
pub fn axpy<T: Float>(alpha: T, x: &[T], y: &mut [T]) {
    y.iter_mut().zip(x.iter()).for_each(|(yi, &xi)| *yi = *yi + alpha * xi);
}

/// y = x + beta * y
pub fn xpay<T: Float>(x: &[T], beta: T, y: &mut [T]) {
    y.iter_mut().zip(x.iter()).for_each(|(yi, &xi)| *yi = xi + beta * *yi);
}

/// x = alpha * x
pub fn scale<T: Float>(alpha: T, x: &mut [T]) {
    x.iter_mut().for_each(|xi| *xi = alpha * *xi);
}

/// z = x - y
pub fn sub<T: Float>(x: &[T], y: &[T], z: &mut [T]) {
    z.iter_mut()
        .zip(x.iter().zip(y.iter()))
        .for_each(|(zi, (&a, &b))| *zi = a - b);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernels() {
        let x = [1.0, 2.0, 3.0];
        let mut y = [1.0, 1.0, 1.0];
        assert_eq!(dot(&x, &y), 6.0);
        axpy(2.0, &x, &mut y);
        assert_eq!(y, [3.0, 5.0, 7.0]);
        xpay(&x, 0.5, &mut y);
        assert_eq!(y, [2.5, 4.5, 6.5]);
        scale(2.0, &mut y);
        assert_eq!(y, [5.0, 9.0, 13.0]);
        let mut z = [0.0; 3];
        sub(&y, &x, &mut z);
        assert_eq!(z, [4.0, 7.0, 10.0]);
    }

    #[test]
    fn test_kernels_f32() {
        let mut v = [1.0f32, 2.0];
        scale(0.5, &mut v);
        assert_eq!(dot(&v, &v), 1.25);
    }
}
