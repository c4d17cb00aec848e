pub mod audit_logs;
pub mod cart_items;
pub mod categories;
pub mod combo_items;
pub mod combos;
pub mod order_items;
pub mod orders;
pub mod otp_codes;
pub mod products;
pub mod users;
pub mod wishlist_items;

pub use audit_logs::Entity as AuditLogs;
pub use cart_items::Entity as CartItems;
pub use categories::Entity as Categories;
pub use combo_items::Entity as ComboItems;
pub use combos::Entity as Combos;
pub use order_items::Entity as OrderItems;
pub use orders::Entity as Orders;
pub use otp_codes::Entity as OtpCodes;
pub use products::Entity as Products;
pub use users::Entity as Users;
pub use wishlist_items::Entity as WishlistItems;
