mod helpers;
mod pantry;
mod plan;
mod recipe;
mod shop;

pub(crate) use helpers::parse_plan_range;
pub(crate) use pantry::{
    PantryFields, cmd_pantry_add, cmd_pantry_expiring, cmd_pantry_list, cmd_pantry_low,
    cmd_pantry_remove, cmd_pantry_update,
};
pub(crate) use plan::{
    cmd_plan_add, cmd_plan_cooked, cmd_plan_generate, cmd_plan_list, cmd_plan_remove,
};
pub(crate) use recipe::{
    cmd_recipe_add, cmd_recipe_delete, cmd_recipe_import, cmd_recipe_list, cmd_recipe_recompute,
    cmd_recipe_show,
};
pub(crate) use shop::{
    cmd_shop_add, cmd_shop_check, cmd_shop_clear, cmd_shop_list, cmd_shop_move_to_pantry,
    cmd_shop_paste, cmd_shop_rebalance, cmd_shop_remove, cmd_shop_rename_category,
    cmd_shop_reorder, cmd_shop_restock, cmd_shop_suggest,
};
