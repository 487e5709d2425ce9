/// Generates operator trait implementations for single-field tuple structs.
///
/// `binary` covers `Add`-style traits, `inplace` covers `AddAssign`-style traits, and `unary`
/// covers `Neg`-style traits.
#[macro_export]
macro_rules! op {
    (binary $type:ty, $trait:ident, $method:ident) => {
        impl $trait for $type {
            type Output = Self;

            fn $method(self, rhs: Self) -> Self::Output {
                Self(self.0.$method(rhs.0))
            }
        }
    };
    (inplace $type:ty, $trait:ident, $method:ident) => {
        impl $trait for $type {
            fn $method(&mut self, rhs: Self) {
                self.0.$method(rhs.0);
            }
        }
    };
    (unary $type:ty, $trait:ident, $method:ident) => {
        impl $trait for $type {
            type Output = Self;

            fn $method(self) -> Self::Output {
                Self(self.0.$method())
            }
        }
    };
}
